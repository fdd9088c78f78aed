use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use iotforge_core::TenantId;

use crate::app::dto::{CreateTenantRequest, UpdateTenantRequest};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(delete))
}

fn parse_id(raw: String) -> Result<TenantId, Response> {
    TenantId::new(raw).map_err(errors::domain_error_to_response)
}

fn not_found(id: &TenantId) -> Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("tenant not found: {id}"))
}

/// Run a notifier mutation on the blocking pool: publishing may block on
/// broker IO.
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
    })
}

pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<CreateTenantRequest>,
) -> Response {
    let snapshot = match req.into_snapshot() {
        Ok(s) => s,
        Err(e) => return errors::domain_error_to_response(e),
    };
    match blocking(move || services.notifier.create_tenant(snapshot)).await {
        Ok(Ok(created)) => (StatusCode::CREATED, Json(created)).into_response(),
        Ok(Err(e)) => errors::notify_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTenantRequest>,
) -> Response {
    let id = match parse_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let updated = blocking(move || {
        let current = match services.notifier.get_tenant(&id) {
            Ok(Some(t)) => t,
            Ok(None) => return Err(not_found(&id)),
            Err(e) => return Err(errors::notify_error_to_response(e)),
        };
        let updated = req.apply(&current).map_err(errors::domain_error_to_response)?;
        services
            .notifier
            .update_tenant(updated)
            .map_err(errors::notify_error_to_response)
    })
    .await;

    match updated {
        Ok(Ok(t)) => Json(t).into_response(),
        Ok(Err(resp)) | Err(resp) => resp,
    }
}

pub async fn delete(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match blocking(move || services.notifier.delete_tenant(&id)).await {
        Ok(Ok(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => errors::notify_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.notifier.get_tenant(&id) {
        Ok(Some(t)) => Json(t).into_response(),
        Ok(None) => not_found(&id),
        Err(e) => errors::notify_error_to_response(e),
    }
}

pub async fn list(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.notifier.list_tenants() {
        Ok(tenants) => Json(tenants).into_response(),
        Err(e) => errors::notify_error_to_response(e),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn blocking_work_leaves_the_runtime_free() {
        let slow = blocking(|| std::thread::sleep(Duration::from_millis(300)));
        tokio::pin!(slow);

        tokio::select! {
            biased;
            _ = &mut slow => panic!("blocking call finished before the timer"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert!(slow.await.is_ok());
    }
}
