//! Search and index-management routes

use std::collections::BTreeMap;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use greenroom_core::{
    CoreError, MetaValue, RankedResult, SearchCriteria, TalentProfile, UpdateRequest, UserContext,
};

use crate::http_error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// SEMANTIC SEARCH
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SemanticSearchBody {
    pub query: String,
    pub filters: Option<SearchCriteria>,
    pub top_k: usize,
    pub include_explanations: bool,
    pub user_context: Option<UserContext>,
}

impl Default for SemanticSearchBody {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: None,
            top_k: 10,
            include_explanations: true,
            user_context: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub talent_id: String,
    pub name: String,
    pub match_score: f64,
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub signals: greenroom_core::SignalScores,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMeta {
    /// Signals that failed and were defaulted during this request
    pub degraded: Vec<String>,
    pub is_degraded: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSearchReply {
    pub query: String,
    pub total_results: usize,
    pub facets: BTreeMap<String, BTreeMap<String, usize>>,
    pub results: Vec<SearchResultItem>,
    pub search_time_ms: u64,
    pub suggested_refinements: Vec<String>,
    pub metadata: SearchMeta,
}

pub async fn semantic(
    State(state): State<AppState>,
    Json(body): Json<SemanticSearchBody>,
) -> ApiResult<Json<SemanticSearchReply>> {
    if body.query.trim().is_empty() {
        return Err(ApiError(CoreError::Validation("query must not be empty".into())));
    }
    let start = Instant::now();
    let criteria = body.filters.unwrap_or_default();
    let top_k = body.top_k.clamp(1, 100);

    let mut outcome = state.search.search(&body.query, &criteria, top_k).await?;

    if let Some(ctx) = &body.user_context {
        let profiles: std::collections::HashMap<String, TalentProfile> = state
            .store
            .list_profiles(None)?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        greenroom_core::RankingEngine::new().rerank(&mut outcome.results, &profiles, ctx);
    }

    let facets = build_facets(&outcome.results);
    let suggested_refinements = suggest_refinements(&criteria, &outcome.results);
    let results = outcome
        .results
        .into_iter()
        .map(|r| SearchResultItem {
            talent_id: r.talent_id,
            name: r.name,
            match_score: r.composite_score,
            rank: r.rank,
            explanation: body.include_explanations.then_some(r.explanation),
            signals: r.signals,
        })
        .collect::<Vec<_>>();

    Ok(Json(SemanticSearchReply {
        query: body.query,
        total_results: outcome.total_candidates,
        facets,
        results,
        search_time_ms: start.elapsed().as_millis() as u64,
        suggested_refinements,
        metadata: SearchMeta {
            is_degraded: !outcome.degraded.is_empty(),
            degraded: outcome.degraded,
        },
    }))
}

fn build_facets(results: &[RankedResult]) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut facets: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for result in results {
        for field in ["location", "gender"] {
            if let Some(MetaValue::Str(value)) = result.metadata.get(field) {
                *facets
                    .entry(field.to_string())
                    .or_default()
                    .entry(value.clone())
                    .or_default() += 1;
            }
        }
    }
    facets
}

fn suggest_refinements(criteria: &SearchCriteria, results: &[RankedResult]) -> Vec<String> {
    let mut suggestions = Vec::new();
    if results.is_empty() {
        if criteria.budget.is_some() {
            suggestions.push("Widen the budget range".to_string());
        }
        if criteria.age_range.is_some() {
            suggestions.push("Widen the age range".to_string());
        }
        if suggestions.is_empty() {
            suggestions.push("Try fewer keywords or a broader description".to_string());
        }
    } else {
        if criteria.locations.is_empty() {
            suggestions.push("Narrow by location".to_string());
        }
        if criteria.age_range.is_none() {
            suggestions.push("Add an age range".to_string());
        }
    }
    suggestions
}

// ============================================================================
// SIMILAR TALENTS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimilarBody {
    pub top_k: usize,
    pub exclude_self: bool,
}

impl Default for SimilarBody {
    fn default() -> Self {
        Self { top_k: 10, exclude_self: true }
    }
}

pub async fn similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SimilarBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let (vector, _) = {
        let index = state
            .index
            .read()
            .map_err(|_| ApiError(CoreError::Internal("index lock poisoned".into())))?;
        index
            .fetch(&id)
            .ok_or_else(|| ApiError(CoreError::NotFound(format!("talent {id}"))))?
    };

    let top_k = body.top_k.clamp(1, 100);
    let fetch_n = if body.exclude_self { top_k + 1 } else { top_k };
    let hits = {
        let index = state
            .index
            .read()
            .map_err(|_| ApiError(CoreError::Internal("index lock poisoned".into())))?;
        index
            .query(&vector, None, fetch_n)
            .map_err(|e| ApiError(CoreError::Persistence(e.to_string())))?
    };

    let similar_talents: Vec<serde_json::Value> = hits
        .into_iter()
        .filter(|h| !(body.exclude_self && h.id == id))
        .take(top_k)
        .map(|h| {
            serde_json::json!({
                "talentId": h.id,
                "similarity": h.score,
                "metadata": h.metadata,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "reference": id,
        "count": similar_talents.len(),
        "similarTalents": similar_talents,
    })))
}

// ============================================================================
// INDEX MANAGEMENT
// ============================================================================

pub async fn index_talent(
    State(state): State<AppState>,
    Json(profile): Json<TalentProfile>,
) -> ApiResult<Json<serde_json::Value>> {
    if profile.id.trim().is_empty() {
        return Err(ApiError(CoreError::Validation("talent id must not be empty".into())));
    }
    let talent_id = profile.id.clone();
    state
        .indexer
        .queue_update(UpdateRequest::upsert(profile).high_priority())?;
    // High-priority updates are visible as soon as this call returns
    state.indexer.drain().await;

    Ok(Json(serde_json::json!({
        "talentId": talent_id,
        "indexedAt": chrono::Utc::now().to_rfc3339(),
    })))
}

pub async fn delete_talent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .indexer
        .queue_update(UpdateRequest::delete(id.clone()).high_priority())?;
    state.indexer.drain().await;
    state.store.delete_profile(&id)?;

    Ok(Json(serde_json::json!({
        "talentId": id,
        "deletedAt": chrono::Utc::now().to_rfc3339(),
    })))
}

pub async fn reindex(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let maintenance = state.maintenance.clone();
    tokio::spawn(async move {
        match maintenance.reindex_all().await {
            Ok(count) => tracing::info!(count, "background reindex finished"),
            Err(e) => tracing::error!("background reindex failed: {}", e),
        }
    });
    Ok(Json(serde_json::json!({ "status": "processing" })))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let index_stats = {
        let index = state
            .index
            .read()
            .map_err(|_| ApiError(CoreError::Internal("index lock poisoned".into())))?;
        index.stats()
    };
    Ok(Json(serde_json::json!({
        "count": index_stats.count,
        "dim": index_stats.dim,
        "backend": index_stats.backend,
        "managerStats": state.indexer.stats(),
    })))
}
