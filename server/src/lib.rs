use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use parking_lot::RwLock;
use search_core::persist::{load_all, IndexPaths};
use search_core::{DocId, DocIdMap, FrozenIndex, RankingConfig, ResolvedHit, SearchEngine, SearchError, SearchStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, AllowOrigin};
use tower_http::trace::TraceLayer;

const MAX_K: i64 = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_k")]
    pub k: i64,
}
fn default_model() -> String { "bm25".into() }
fn default_k() -> i64 { 50 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub model: String,
    pub model_display_name: &'static str,
    pub status: SearchStatus,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<ResolvedHit>,
}

/// One loaded index directory: the engine serving its index and the metadata table
/// for the same ids. Requests clone the `Arc` once and use both halves of it.
pub struct Published {
    pub engine: SearchEngine,
    pub doc_map: DocIdMap,
}

impl Published {
    pub fn new(index: FrozenIndex, doc_map: DocIdMap, ranking: RankingConfig) -> Self {
        Self { engine: SearchEngine::with_index(index, ranking), doc_map }
    }
}

/// Loaded state shared by every request. Reload swaps the whole [`Published`] in one
/// write, so no request sees an index paired with another build's metadata.
#[derive(Clone)]
pub struct AppState {
    pub index_root: PathBuf,
    pub ranking: RankingConfig,
    pub published: Arc<RwLock<Arc<Published>>>,
    pub admin_token: Option<String>,
}

impl AppState {
    /// Load the index directory once and publish it.
    pub fn load(index_dir: &str, ranking: RankingConfig, admin_token: Option<String>) -> Result<Self> {
        ranking.validate()?;
        let index_root = PathBuf::from(index_dir);
        let (index, doc_map) = load_all(&IndexPaths::new(&index_root))?;
        Ok(Self {
            index_root,
            ranking,
            published: Arc::new(RwLock::new(Arc::new(Published::new(index, doc_map, ranking)))),
            admin_token,
        })
    }

    pub fn current(&self) -> Arc<Published> {
        self.published.read().clone()
    }

    /// Make `index` and `doc_map` visible to subsequent requests. Returns the replaced pair.
    pub fn publish(&self, index: FrozenIndex, doc_map: DocIdMap) -> Arc<Published> {
        let next = Arc::new(Published::new(index, doc_map, self.ranking));
        std::mem::replace(&mut *self.published.write(), next)
    }
}

pub fn build_app(index_dir: String, ranking: RankingConfig) -> Result<Router> {
    // Load index at startup
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app_state = AppState::load(&index_dir, ranking, admin_token)?;

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Ok(router(app_state).layer(cors).layer(TraceLayer::new_for_http()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/index/reload", post(index_reload))
        .with_state(state)
}

pub fn model_display_name(model: &str) -> &'static str {
    match model {
        "vsm" => "TF-IDF Portal Gun",
        "bm25" => "BM25 Meeseeks Box",
        "lm_dirichlet" => "Language Model Microverse",
        _ => "Unknown Dimension",
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let k = params.k.min(MAX_K);
    let published = state.current();
    let outcome = published.engine.search(&params.model, &params.query, k).map_err(|err| match err {
        SearchError::IndexNotReady => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    })?;

    let results = published.doc_map.resolve(&outcome.hits);
    let model = outcome.model.map(|m| m.name().to_string()).unwrap_or(params.model);
    let elapsed = start.elapsed();
    tracing::info!(query = %params.query, model = %model, hits = results.len(), took_s = elapsed.as_secs_f64(), "search");

    Ok(Json(SearchResponse {
        query: params.query,
        model_display_name: model_display_name(&model),
        model,
        status: outcome.status,
        took_s: elapsed.as_secs_f64(),
        total_hits: outcome.hits.len(),
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<DocId>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let published = state.current();
    let length = published.engine.snapshot().ok().and_then(|index| index.doc_length(doc_id));
    match published.doc_map.get(doc_id) {
        Some(meta) => Ok(Json(serde_json::json!({
            "doc_id": doc_id,
            "image_url": meta.image_url,
            "source_page": meta.source_page,
            "alt_text": meta.alt_text,
            "length": length,
        }))),
        None => Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" })))),
    }
}

// --- Admin endpoints ---
async fn index_reload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let root = state.index_root.clone();
    let loaded = tokio::task::spawn_blocking(move || load_all(&IndexPaths::new(root)))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let (index, doc_map) = loaded.map_err(|err| {
        tracing::warn!(%err, "reload failed, keeping current index");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("reload failed: {err}"))
    })?;

    let num_docs = index.num_docs();
    state.publish(index, doc_map);
    tracing::info!(num_docs, "index reloaded");
    Ok(Json(serde_json::json!({ "reloaded": true, "num_docs": num_docs })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
