//! Elasticsearch dialect transcoder.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use rankrelay_core::{
    Choices, Cid, Error, PathBinding, Qid, Query, Ranks, Request, Response, Result, StatusMap,
};

use crate::codex::Codex;

/// Result count when the request names none, matching the search API's own
/// default page size.
const DEFAULT_SIZE: usize = 10;

/// Transcoder for the Elasticsearch search API.
pub struct EsCodex {
    multiplier: usize,
    field: Option<String>,
    packed: AtomicU64,
}

impl EsCodex {
    pub fn new(multiplier: usize, field: Option<String>) -> Self {
        Self {
            multiplier,
            field,
            packed: AtomicU64::new(0),
        }
    }

    /// Result count the client asked for: body `size`, then the query
    /// parameter, then the API default.
    fn requested_size(&self, req: &Request) -> usize {
        if !req.body.is_empty() {
            if let Ok(body) = serde_json::from_slice::<Value>(&req.body) {
                if let Some(size) = body.get("size").and_then(Value::as_u64) {
                    return size as usize;
                }
            }
        }
        req.query_param("size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SIZE)
    }

    fn body_json(req: &Request) -> Result<Value> {
        serde_json::from_slice(&req.body)
            .map_err(|e| Error::BadRequest(format!("invalid JSON body: {e}")))
    }

    /// Query text from a search request: the JSON query DSL first, then the
    /// `q` parameter.
    fn extract_query(&self, req: &Request) -> Result<Query> {
        if !req.body.is_empty() {
            let body = Self::body_json(req)?;
            if let Some(text) = dsl_query_text(&body) {
                return Ok(Query(text));
            }
        }
        if let Some(q) = req.query_param("q") {
            return Ok(Query(q));
        }
        Err(Error::BadRequest(
            "no query in request body or q parameter".to_string(),
        ))
    }

    /// Candidate choice from one upstream hit. With a configured field the
    /// choice is that field's value, otherwise the hit source.
    fn choice_from_hit(&self, hit: &Value) -> Value {
        match &self.field {
            Some(field) => hit
                .get("_source")
                .and_then(|source| source.get(field))
                .cloned()
                .unwrap_or(Value::Null),
            None => hit.get("_source").cloned().unwrap_or_else(|| hit.clone()),
        }
    }
}

#[async_trait]
impl Codex for EsCodex {
    fn name(&self) -> &'static str {
        "EsCodex"
    }

    fn search_path(&self) -> PathBinding {
        PathBinding::new("/{index}/_search", &["GET", "POST"])
    }

    fn train_path(&self) -> PathBinding {
        PathBinding::new("/train", &["POST"])
    }

    fn status_path(&self) -> PathBinding {
        PathBinding::new("/status", &["GET"])
    }

    fn error_path(&self) -> PathBinding {
        PathBinding::new("/error", &["POST"])
    }

    async fn magnify(&self, req: &Request) -> Result<Request> {
        let mut out = req.clone();
        let size = self.requested_size(req);
        let magnified = size.saturating_mul(self.multiplier);
        if req.body.is_empty() {
            out.set_query_param("size", &magnified.to_string());
        } else {
            let mut body = Self::body_json(req)?;
            let obj = body.as_object_mut().ok_or_else(|| {
                Error::BadRequest("search body must be a JSON object".to_string())
            })?;
            // The magnified count goes where the client carried the original;
            // the search API prefers the URI param over the body.
            if obj.get("size").and_then(Value::as_u64).is_some() {
                obj.insert("size".to_string(), json!(magnified));
                out.body = serde_json::to_vec(&body)?;
                out.headers
                    .insert("content-length".to_string(), out.body.len().to_string());
            } else {
                out.set_query_param("size", &magnified.to_string());
            }
        }
        debug!("magnified request: {size} -> {magnified} results");
        Ok(out)
    }

    async fn parse(&self, req: &Request, resp: &Response) -> Result<(Query, Choices)> {
        if resp.status >= 400 {
            return Err(Error::Upstream(format!(
                "search API answered {} for {}",
                resp.status,
                req.path_only()
            )));
        }
        let body: Value = serde_json::from_slice(&resp.body)
            .map_err(|e| Error::Upstream(format!("search API sent invalid JSON: {e}")))?;
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Upstream("search API response has no hits".to_string()))?;
        let query = self.extract_query(req)?;
        let choices = hits.iter().map(|hit| self.choice_from_hit(hit)).collect();
        Ok((query, choices))
    }

    async fn pack(
        &self,
        req: &Request,
        resp: &Response,
        _query: &Query,
        choices: &Choices,
        ranks: &Ranks,
        qid: Qid,
        cids: &[Cid],
    ) -> Result<Response> {
        if ranks.len() != choices.len() || cids.len() != choices.len() {
            return Err(Error::Codex(format!(
                "misaligned pack input: {} choices, {} ranks, {} cids",
                choices.len(),
                ranks.len(),
                cids.len()
            )));
        }
        let mut body: Value = serde_json::from_slice(&resp.body)
            .map_err(|e| Error::Upstream(format!("search API sent invalid JSON: {e}")))?;
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| Error::Upstream("search API response has no hits".to_string()))?;
        if hits.len() != choices.len() {
            return Err(Error::Codex(format!(
                "response hits drifted from parse: {} hits, {} choices",
                hits.len(),
                choices.len()
            )));
        }

        // Stable sort keeps upstream order between equal ranks.
        let k = self.requested_size(req);
        let mut order: Vec<usize> = (0..ranks.len()).collect();
        order.sort_by(|a, b| {
            ranks[*b]
                .partial_cmp(&ranks[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut reranked = Vec::with_capacity(k.min(hits.len()));
        for &i in order.iter().take(k) {
            let mut hit = hits[i].clone();
            if let Some(obj) = hit.as_object_mut() {
                obj.insert("_score".to_string(), json!(ranks[i]));
                obj.insert(
                    "_rankrelay".to_string(),
                    json!({ "qid": qid.0, "cid": cids[i].0 }),
                );
            }
            reranked.push(hit);
        }
        let max_score = reranked
            .first()
            .and_then(|hit| hit.get("_score"))
            .cloned()
            .unwrap_or(Value::Null);
        if let Some(hits_obj) = body.get_mut("hits").and_then(Value::as_object_mut) {
            hits_obj.insert("hits".to_string(), Value::Array(reranked));
            hits_obj.insert("max_score".to_string(), max_score);
        }

        let out_body = serde_json::to_vec(&body)?;
        let mut headers = resp.headers.clone();
        headers.insert("content-length".to_string(), out_body.len().to_string());
        self.packed.fetch_add(1, Ordering::Relaxed);
        debug!("packed {} of {} choices", k.min(choices.len()), choices.len());
        Ok(Response {
            protocol: resp.protocol.clone(),
            status: resp.status,
            headers,
            body: out_body,
        })
    }

    async fn pluck(&self, req: &Request) -> Result<(Qid, Vec<Cid>)> {
        let body = Self::body_json(req)?;
        let qid = body
            .get("qid")
            .and_then(Value::as_i64)
            .map(Qid)
            .ok_or_else(|| Error::BadRequest("train body needs a numeric qid".to_string()))?;
        let cids: Vec<Cid> = match body.get("cids") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_i64().map(Cid))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| Error::BadRequest("cids must be numeric".to_string()))?,
            Some(_) => return Err(Error::BadRequest("cids must be an array".to_string())),
            None => match body.get("cid").and_then(Value::as_i64) {
                Some(cid) => vec![Cid(cid)],
                None => {
                    return Err(Error::BadRequest("train body needs cids or cid".to_string()))
                }
            },
        };
        Ok((qid, cids))
    }

    async fn ack(&self, qid: Qid, cids: &[Cid]) -> Result<Response> {
        let cids: Vec<i64> = cids.iter().map(|c| c.0).collect();
        Ok(Response::json(
            200,
            &json!({ "qid": qid.0, "cids": cids, "status": "trained" }),
        ))
    }

    async fn catch(&self, err: &Error) -> Result<Response> {
        Ok(Response::json(
            err.status_code(),
            &json!({ "error": err.to_string(), "kind": err.kind() }),
        ))
    }

    fn pulse(&self, state: StatusMap) -> Response {
        Response::json_pretty(200, &Value::Object(state))
    }

    fn chain_state(&self, mut state: StatusMap) -> StatusMap {
        state.insert(
            self.name().to_string(),
            json!({
                "multiplier": self.multiplier,
                "field": self.field,
                "packed": self.packed.load(Ordering::Relaxed),
            }),
        );
        state
    }
}

/// Query text from the search DSL. Handles `match` (plain and object
/// forms) and `query_string` queries.
fn dsl_query_text(body: &Value) -> Option<String> {
    let query = body.get("query")?;
    if let Some(m) = query.get("match").and_then(Value::as_object) {
        let (_, v) = m.iter().next()?;
        match v {
            Value::String(s) => return Some(s.clone()),
            Value::Object(inner) => {
                if let Some(Value::String(s)) = inner.get("query") {
                    return Some(s.clone());
                }
            }
            _ => {}
        }
    }
    if let Some(Value::String(s)) = query.pointer("/query_string/query") {
        return Some(s.clone());
    }
    None
}
