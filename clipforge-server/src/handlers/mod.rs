pub mod handle_websocket;
pub mod records;
pub mod uploads;

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "healing_active": state.healing().active_count(),
        "signing": state.signer.is_some(),
    }))
}
