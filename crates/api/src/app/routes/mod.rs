use axum::{
    Router,
    routing::get,
};

pub mod engines;
pub mod system;
pub mod tenants;

/// Router for all node endpoints except `/health`.
pub fn router() -> Router {
    Router::new()
        .route("/engines", get(engines::list))
        .nest("/tenants", tenants::router())
}
