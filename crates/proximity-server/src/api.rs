use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::require_session;
use crate::handlers;
use crate::state::AppState;

/// Builds the full router: `/health` is unauthenticated, everything under
/// `/api` requires a session.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/catalog/", get(handlers::catalog::list_catalog))
        .route("/catalog/search", get(handlers::catalog::search_catalog))
        .route("/catalog/reload", post(handlers::catalog::reload_catalog))
        .route("/catalog/:id", get(handlers::catalog::get_catalog_app))
        .route("/apps/", get(handlers::apps::list_apps).post(handlers::apps::create_app))
        .route("/apps/:id", get(handlers::apps::get_app))
        .route("/apps/:id/action", post(handlers::apps::app_action))
        .route("/apps/:id/clone", post(handlers::apps::clone_app))
        .route("/apps/:id/logs", get(handlers::apps::app_logs))
        .route("/apps/:id/stats", get(handlers::apps::app_stats))
        .route(
            "/apps/:id/backups",
            get(handlers::backups::list_backups).post(handlers::backups::create_backup),
        )
        .route("/apps/:id/backups/:bid/restore", post(handlers::backups::restore_backup))
        .route("/apps/:id/backups/:bid", delete(handlers::backups::delete_backup))
        .route(
            "/core/settings/:category",
            get(handlers::settings::get_settings).post(handlers::settings::put_settings),
        )
        .route_layer(axum::middleware::from_fn(require_session));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use proximity_common::crypto::MasterKey;
    use proximity_core::Services;
    use proximity_store::SqlxStore;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let store: std::sync::Arc<dyn proximity_core::Store> =
            std::sync::Arc::new(SqlxStore::in_memory().await.unwrap());
        let master_key = MasterKey::generate();
        let services = std::sync::Arc::new(Services::new(store, master_key.clone()));
        let catalog_dir = tempfile::tempdir().unwrap();
        let catalog = crate::catalog::Catalog::load(catalog_dir.path()).await.unwrap();

        AppState {
            services,
            catalog,
            config: std::sync::Arc::new(ServerConfig::default()),
            master_key,
        }
    }

    #[tokio::test]
    async fn health_check_requires_no_session() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_reject_requests_without_a_session() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/catalog/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn api_routes_accept_requests_with_a_session_cookie() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/catalog/")
                    .header("Cookie", "proximity_session=abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
