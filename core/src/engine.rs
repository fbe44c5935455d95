use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Result, SearchError};
use crate::index::FrozenIndex;
use crate::ranking::{RankingConfig, RankingModel, ScoredDoc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Ok,
    NoMatches,
    UnknownModel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    pub model: Option<RankingModel>,
    pub hits: Vec<ScoredDoc>,
}

/// Process-wide holder of the published index.
///
/// The index is published once after loading (or again on an explicit reload). Queries
/// take a cheap `Arc` snapshot and score without holding the lock.
pub struct SearchEngine {
    index: RwLock<Option<Arc<FrozenIndex>>>,
    config: RankingConfig,
}

impl SearchEngine {
    pub fn new(config: RankingConfig) -> Self {
        Self { index: RwLock::new(None), config }
    }

    pub fn with_index(index: FrozenIndex, config: RankingConfig) -> Self {
        Self { index: RwLock::new(Some(Arc::new(index))), config }
    }

    pub fn config(&self) -> &RankingConfig { &self.config }

    /// Make `index` the one all subsequent queries see. Returns the previous index.
    pub fn publish(&self, index: FrozenIndex) -> Option<Arc<FrozenIndex>> {
        tracing::info!(num_docs = index.num_docs(), "publishing index");
        self.index.write().replace(Arc::new(index))
    }

    pub fn is_ready(&self) -> bool { self.index.read().is_some() }

    pub fn snapshot(&self) -> Result<Arc<FrozenIndex>> {
        self.index.read().clone().ok_or(SearchError::IndexNotReady)
    }

    /// Search by model name. An unrecognized name is not an error: it yields no hits
    /// and an `UnknownModel` status.
    pub fn search(&self, model_name: &str, query: &str, top_k: i64) -> Result<SearchOutcome> {
        let index = self.snapshot()?;
        match model_name.parse::<RankingModel>() {
            Ok(model) => Ok(self.run(&index, model, query, top_k)),
            Err(err) => {
                tracing::warn!(%err, "returning no results");
                Ok(SearchOutcome { status: SearchStatus::UnknownModel, model: None, hits: Vec::new() })
            }
        }
    }

    pub fn search_model(&self, model: RankingModel, query: &str, top_k: i64) -> Result<SearchOutcome> {
        let index = self.snapshot()?;
        Ok(self.run(&index, model, query, top_k))
    }

    fn run(&self, index: &FrozenIndex, model: RankingModel, query: &str, top_k: i64) -> SearchOutcome {
        let start = Instant::now();
        let hits = index.rank(model, query, top_k, &self.config);
        tracing::debug!(%model, query, hits = hits.len(), took_s = start.elapsed().as_secs_f64(), "search");
        let status = if hits.is_empty() { SearchStatus::NoMatches } else { SearchStatus::Ok };
        SearchOutcome { status, model: Some(model), hits }
    }
}
