use std::sync::Arc;

use axum::{Json, extract::Extension};

use iotforge_infra::engine::EngineStatusView;

use crate::app::services::AppServices;

/// This node's tenant engines, including recent failures.
pub async fn list(Extension(services): Extension<Arc<AppServices>>) -> Json<Vec<EngineStatusView>> {
    Json(services.registry.statuses())
}
