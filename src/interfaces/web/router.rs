use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers;

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route("/api/tasks/{id}", get(handlers::get_task))
        .route(
            "/api/instructions",
            get(handlers::list_instructions).post(handlers::add_instruction),
        )
        .route(
            "/api/instructions/{id}",
            axum::routing::delete(handlers::remove_instruction),
        )
        .route("/api/credentials", post(handlers::upsert_credential))
        .route("/api/proactive/trigger", post(handlers::trigger_proactive))
        .route("/api/proactive/event", post(handlers::proactive_event))
        .route("/api/logs", get(handlers::stream_logs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proactive::ProactiveProcessor;
    use crate::core::queue::TaskQueue;
    use crate::core::store::Storage;
    use crate::core::store::types::{TaskStatus, TaskType};
    use crate::core::tools::ToolRegistry;
    use crate::testkit::{MockCalendarConnector, MockCrmConnector, MockEmailConnector, ScriptedLlm};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ScriptedLlm::text("ok"))]));
        let processor = Arc::new(ProactiveProcessor::new(
            storage.clone(),
            llm.clone(),
            Arc::new(ToolRegistry::new()),
        ));
        let queue = Arc::new(TaskQueue::new(
            storage.clone(),
            processor.clone(),
            Arc::new(MockEmailConnector::new()),
            Arc::new(MockCrmConnector::new()),
            Arc::new(MockCalendarConnector::new()),
            llm,
        ));
        let credentials = Arc::new(crate::core::credentials::CredentialStore::new(&storage));
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        AppState {
            storage,
            queue,
            processor,
            credentials,
            log_tx,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let router = build_api_router(state());
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_list_tasks_roundtrip() {
        let state = state();
        let router = build_api_router(state.clone());

        let request = Request::post("/api/tasks")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "user_id": "advisor-1",
                    "task_type": "create_contact",
                    "data": { "email": "a@b.com" },
                })
                .to_string(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["success"], true);

        let response = router
            .oneshot(
                Request::get("/api/tasks?user_id=advisor-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(listed["tasks"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn unknown_task_type_is_rejected() {
        let router = build_api_router(state());
        let request = Request::post("/api/tasks")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "user_id": "advisor-1",
                    "task_type": "solve_world_hunger",
                    "data": {},
                })
                .to_string(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn instruction_crud_over_http() {
        let state = state();
        let router = build_api_router(state.clone());

        let request = Request::post("/api/instructions")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "user_id": "advisor-1",
                    "instruction": "thank new contacts",
                    "trigger_type": "contact_created",
                })
                .to_string(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let created = body_json(response).await;
        assert_eq!(created["success"], true);
        let id = created["instruction"]["id"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/instructions?user_id=advisor-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed["instructions"].as_array().unwrap().len(), 1);

        let response = router
            .oneshot(
                Request::delete(format!("/api/instructions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let deleted = body_json(response).await;
        assert_eq!(deleted["success"], true);
    }

    #[tokio::test]
    async fn credential_upsert_makes_the_user_pollable() {
        let state = state();
        let router = build_api_router(state.clone());

        let request = Request::post("/api/credentials")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "user_id": "advisor-1",
                    "service": "google",
                    "access_token": "ya29.token",
                })
                .to_string(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);

        let users = state
            .credentials
            .users_with_valid(crate::core::credentials::Service::Google)
            .await
            .unwrap();
        assert_eq!(users, vec!["advisor-1"]);
    }

    #[tokio::test]
    async fn trigger_endpoint_parks_an_ai_task() {
        let state = state();
        let router = build_api_router(state.clone());

        let request = Request::post("/api/proactive/trigger")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "user_id": "advisor-1",
                    "trigger_type": "contact_created",
                    "data": { "contact_id": "c-1" },
                })
                .to_string(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);

        let pending = state
            .storage
            .list_tasks_by_status(TaskStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_type, TaskType::AiProcessing);
    }
}
