//! In-memory feedback store, for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use rankrelay_core::{CallId, Choices, Cid, Error, Labels, Qid, Query, Result, StatusMap};

use crate::db::{Db, LapBoard};

#[derive(Default)]
struct MemInner {
    next_qid: i64,
    next_cid: i64,
    saved: HashMap<i64, SavedQuery>,
}

struct SavedQuery {
    text: String,
    choices: Vec<(i64, Value)>,
}

/// Feedback store that keeps everything in process memory.
#[derive(Default)]
pub struct MemDb {
    inner: Mutex<MemInner>,
    laps: LapBoard,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Db for MemDb {
    fn name(&self) -> &'static str {
        "MemDb"
    }

    async fn save(&self, query: &Query, choices: &Choices) -> Result<(Qid, Vec<Cid>)> {
        let mut inner = self.inner.lock();
        inner.next_qid += 1;
        let qid = inner.next_qid;
        let mut stored = Vec::with_capacity(choices.len());
        let mut cids = Vec::with_capacity(choices.len());
        for choice in choices {
            inner.next_cid += 1;
            stored.push((inner.next_cid, choice.clone()));
            cids.push(Cid(inner.next_cid));
        }
        inner.saved.insert(
            qid,
            SavedQuery {
                text: query.0.clone(),
                choices: stored,
            },
        );
        Ok((Qid(qid), cids))
    }

    async fn get(&self, qid: Qid, cids: &[Cid]) -> Result<(Query, Choices, Labels)> {
        let inner = self.inner.lock();
        let saved = inner
            .saved
            .get(&qid.0)
            .ok_or_else(|| Error::Db(format!("unknown qid {}", qid.0)))?;
        for flagged in cids {
            if !saved.choices.iter().any(|(cid, _)| *cid == flagged.0) {
                return Err(Error::Db(format!(
                    "cid {} does not belong to qid {}",
                    flagged.0, qid.0
                )));
            }
        }
        let choices: Choices = saved.choices.iter().map(|(_, c)| c.clone()).collect();
        let labels = Labels(
            saved
                .choices
                .iter()
                .map(|(cid, _)| {
                    let flagged = cids.iter().any(|c| c.0 == *cid);
                    (Cid(*cid), if flagged { 1.0 } else { 0.0 })
                })
                .collect(),
        );
        Ok((Query(saved.text.clone()), choices, labels))
    }

    fn lap(&self, ms: f64, call: CallId) {
        self.laps.record(ms, call);
    }

    fn chain_state(&self, mut state: StatusMap) -> StatusMap {
        let inner = self.inner.lock();
        state.insert(
            self.name().to_string(),
            json!({
                "queries": inner.saved.len(),
                "choices": inner.saved.values().map(|s| s.choices.len()).sum::<usize>(),
                "laps": self.laps.fragment(),
            }),
        );
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_assigns_fresh_ids() {
        let db = MemDb::new();
        let choices = vec![json!("a"), json!("b"), json!("c")];
        let (qid, cids) = db.save(&Query("q".into()), &choices).await.unwrap();
        assert_eq!(cids.len(), 3);
        let (qid2, cids2) = db.save(&Query("r".into()), &choices).await.unwrap();
        assert_ne!(qid, qid2);
        assert!(cids.iter().all(|c| !cids2.contains(c)));
    }

    #[tokio::test]
    async fn get_labels_flagged_choices() {
        let db = MemDb::new();
        let choices = vec![json!("a"), json!("b"), json!("c")];
        let (qid, cids) = db.save(&Query("q".into()), &choices).await.unwrap();
        let (query, loaded, labels) = db.get(qid, &[cids[1]]).await.unwrap();
        assert_eq!(query, Query("q".into()));
        assert_eq!(loaded, choices);
        assert_eq!(labels.label_for(cids[0]), Some(0.0));
        assert_eq!(labels.label_for(cids[1]), Some(1.0));
        assert_eq!(labels.label_for(cids[2]), Some(0.0));
    }

    #[tokio::test]
    async fn get_unknown_qid_fails() {
        let db = MemDb::new();
        assert!(db.get(Qid(99), &[]).await.is_err());
    }

    #[tokio::test]
    async fn get_rejects_foreign_cids() {
        let db = MemDb::new();
        let (qid, _) = db.save(&Query("q".into()), &vec![json!("a")]).await.unwrap();
        assert!(db.get(qid, &[Cid(999)]).await.is_err());
    }

    #[tokio::test]
    async fn laps_land_in_chain_state() {
        let db = MemDb::new();
        let call = CallId::new("EsCodex", "magnify");
        db.lap(4.0, call);
        db.lap(6.0, call);
        let state = db.chain_state(StatusMap::new());
        let laps = &state["MemDb"]["laps"]["EsCodex.magnify"];
        assert_eq!(laps["count"], json!(2));
        assert_eq!(laps["avg_ms"], json!(5.0));
        assert_eq!(laps["max_ms"], json!(6.0));
    }
}
