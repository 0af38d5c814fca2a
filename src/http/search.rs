//! Keyword search over the bundled marker reference dataset

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::AppState;

/// Upper bound on entries returned per query.
pub const MAX_RESULTS: usize = 50;

/// One entry of the reference dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerEntry {
    pub id: u32,
    pub name: String,
    pub category: String,
}

/// Parse the dataset bundled into the binary. Called once at startup.
pub fn load_dataset() -> Result<Vec<MarkerEntry>> {
    let entries: Vec<MarkerEntry> = serde_json::from_str(include_str!("../../data/markers.json"))?;
    Ok(entries)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
}

/// `GET /search?q=...`
pub async fn search_handler(
    Query(query): Query<SearchQuery>,
    State(state): State<AppState>,
) -> Response {
    state.counters.record_search();

    let keyword = match query.q {
        Some(q) if !q.is_empty() => q,
        _ => return (StatusCode::BAD_REQUEST, "Query parameter q is required").into_response(),
    };

    let matches = search_entries(&state.dataset, &keyword);
    state.counters.record_hits(matches.len() as u64);
    Json(matches).into_response()
}

/// Case-insensitive substring match on entry names, capped at [`MAX_RESULTS`].
pub fn search_entries<'a>(dataset: &'a [MarkerEntry], keyword: &str) -> Vec<&'a MarkerEntry> {
    let needle = keyword.to_lowercase();
    dataset
        .iter()
        .filter(|entry| entry.name.to_lowercase().contains(&needle))
        .take(MAX_RESULTS)
        .collect()
}
