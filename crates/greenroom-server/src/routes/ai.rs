//! AI utility routes: script analysis and the usage report

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use greenroom_core::CoreError;

use crate::http_error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeScriptBody {
    pub script_text: String,
    pub extract_characters: bool,
    pub extract_requirements: bool,
}

impl Default for AnalyzeScriptBody {
    fn default() -> Self {
        Self {
            script_text: String::new(),
            extract_characters: true,
            extract_requirements: true,
        }
    }
}

pub async fn analyze_script(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeScriptBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.script_text.trim().is_empty() {
        return Err(ApiError(CoreError::Validation(
            "scriptText must not be empty".into(),
        )));
    }

    let analysis = state.script_analyzer.analyze(&body.script_text);
    let characters = if body.extract_characters {
        serde_json::to_value(&analysis.characters).unwrap_or_default()
    } else {
        serde_json::json!([])
    };
    let requirements = if body.extract_requirements {
        serde_json::to_value(&analysis.requirements).unwrap_or_default()
    } else {
        serde_json::json!([])
    };

    Ok(Json(serde_json::json!({
        "characters": characters,
        "requirements": requirements,
        "suggestions": analysis.suggestions,
        "scenes": analysis.scenes.len(),
    })))
}

pub async fn usage_report(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state.orchestrator.usage().report();
    Json(serde_json::to_value(&report).unwrap_or_default())
}
