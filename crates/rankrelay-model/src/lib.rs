//! RankRelay Model — ranking models behind the `Model` trait.
//!
//! `UnigramModel` learns per-token weights from train feedback.
//! `PassthroughModel` keeps upstream order; it is the baseline for
//! measuring whether learned ranking actually helps.

pub mod model;
pub mod unigram;

pub use model::{Model, PassthroughModel};
pub use unigram::UnigramModel;

use std::sync::Arc;

use rankrelay_core::{DataPaths, ModelKind};

/// Instantiate the configured model.
pub fn create_model(kind: ModelKind, lr: f32, paths: &DataPaths) -> Arc<dyn Model> {
    match kind {
        ModelKind::Unigram => {
            tracing::info!("using unigram model (lr={lr})");
            Arc::new(UnigramModel::load(lr, paths))
        }
        ModelKind::Passthrough => {
            tracing::info!("using passthrough model");
            Arc::new(PassthroughModel::new())
        }
    }
}
