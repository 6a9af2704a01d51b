//! Trainable unigram ranking model.
//!
//! Keeps one learned weight per token. A choice's raw score sums, over its
//! tokens, term frequency times the token weight, with a fixed bonus of 1.0
//! for tokens that also appear in the query. Ranks are the sigmoid of the
//! raw score. Training takes one SGD step per labeled choice and persists
//! the weights as JSON under the data directory.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use rankrelay_core::{Choices, DataPaths, Error, Labels, Query, Ranks, Result, StatusMap};

use crate::model::Model;

#[derive(Debug, Default, Serialize, Deserialize)]
struct UnigramState {
    weights: HashMap<String, f32>,
    updates: u64,
}

/// Unigram model with persisted per-token weights.
pub struct UnigramModel {
    lr: f32,
    weights_file: PathBuf,
    state: RwLock<UnigramState>,
}

impl UnigramModel {
    /// Load persisted weights from the data directory, or start empty.
    pub fn load(lr: f32, paths: &DataPaths) -> Self {
        let weights_file = paths.model_file.clone();
        let state = match std::fs::read_to_string(&weights_file) {
            Ok(raw) => match serde_json::from_str::<UnigramState>(&raw) {
                Ok(state) => {
                    info!(
                        "loaded unigram weights: {} tokens, {} updates",
                        state.weights.len(),
                        state.updates
                    );
                    state
                }
                Err(e) => {
                    warn!(
                        "ignoring corrupt weights file {}: {}",
                        weights_file.display(),
                        e
                    );
                    UnigramState::default()
                }
            },
            Err(_) => UnigramState::default(),
        };
        Self {
            lr,
            weights_file,
            state: RwLock::new(state),
        }
    }

    fn persist(&self, state: &UnigramState) -> Result<()> {
        let raw = serde_json::to_string(state)?;
        std::fs::write(&self.weights_file, raw)?;
        Ok(())
    }

    fn score(state: &UnigramState, query_tokens: &HashSet<String>, choice: &serde_json::Value) -> f32 {
        let tokens = tokenize(&choice_text(choice));
        if tokens.is_empty() {
            return 0.0;
        }
        let len = tokens.len() as f32;
        let mut tf: HashMap<String, f32> = HashMap::new();
        for t in tokens {
            *tf.entry(t).or_insert(0.0) += 1.0;
        }
        let mut raw = 0.0;
        for (token, count) in &tf {
            let weight = state.weights.get(token).copied().unwrap_or(0.0)
                + if query_tokens.contains(token) { 1.0 } else { 0.0 };
            raw += weight * count / len;
        }
        raw
    }
}

#[async_trait]
impl Model for UnigramModel {
    fn name(&self) -> &'static str {
        "UnigramModel"
    }

    async fn rank(&self, query: &Query, choices: &Choices) -> Result<Ranks> {
        let query_tokens: HashSet<String> = tokenize(&query.0).into_iter().collect();
        let state = self.state.read();
        Ok(choices
            .iter()
            .map(|choice| sigmoid(Self::score(&state, &query_tokens, choice)))
            .collect())
    }

    async fn train(&self, query: &Query, choices: &Choices, labels: &Labels) -> Result<()> {
        if labels.len() != choices.len() {
            return Err(Error::Model(format!(
                "got {} labels for {} choices",
                labels.len(),
                choices.len()
            )));
        }
        let query_tokens: HashSet<String> = tokenize(&query.0).into_iter().collect();
        let mut state = self.state.write();
        for (choice, (_, label)) in choices.iter().zip(&labels.0) {
            let tokens = tokenize(&choice_text(choice));
            if tokens.is_empty() {
                continue;
            }
            let len = tokens.len() as f32;
            let predicted = sigmoid(Self::score(&state, &query_tokens, choice));
            let err = *label - predicted;
            let mut tf: HashMap<String, f32> = HashMap::new();
            for t in tokens {
                *tf.entry(t).or_insert(0.0) += 1.0;
            }
            for (token, count) in tf {
                *state.weights.entry(token).or_insert(0.0) += self.lr * err * count / len;
            }
        }
        // One update per train call, not per choice.
        state.updates += 1;
        debug!("unigram updated: {} tokens in vocabulary", state.weights.len());
        self.persist(&state)
    }

    fn chain_state(&self, mut state: StatusMap) -> StatusMap {
        let inner = self.state.read();
        state.insert(
            self.name().to_string(),
            json!({
                "lr": self.lr,
                "vocabulary": inner.weights.len(),
                "updates": inner.updates,
            }),
        );
        state
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Text a choice is ranked by: strings as-is, structured values by
/// concatenating their string leaves.
fn choice_text(choice: &serde_json::Value) -> String {
    match choice {
        serde_json::Value::String(s) => s.clone(),
        other => {
            let mut out = String::new();
            collect_strings(other, &mut out);
            out
        }
    }
}

fn collect_strings(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(s);
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}
