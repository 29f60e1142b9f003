use axum::{
    Json,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use super::AppState;
use crate::core::credentials::Service;
use crate::core::store::types::{TaskType, TriggerType};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

pub async fn list_tasks(
    Query(query): Query<UserQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.storage.list_tasks_for_user(&query.user_id, 50).await {
        Ok(tasks) => Json(serde_json::json!({ "success": true, "tasks": tasks })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn get_task(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.storage.get_task(&id).await {
        Ok(Some(task)) => Json(serde_json::json!({ "success": true, "task": task })),
        Ok(None) => Json(serde_json::json!({ "success": false, "error": "Task not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub user_id: String,
    pub task_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Json<serde_json::Value> {
    let Some(task_type) = TaskType::from_kind(&payload.task_type) else {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("Unknown task type: {}", payload.task_type),
        }));
    };

    match state
        .queue
        .create_task(&payload.user_id, task_type, &payload.data)
        .await
    {
        Ok(task) => Json(serde_json::json!({ "success": true, "task": task })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn list_instructions(
    Query(query): Query<UserQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state
        .storage
        .get_active_instructions(&query.user_id, None)
        .await
    {
        Ok(instructions) => {
            Json(serde_json::json!({ "success": true, "instructions": instructions }))
        }
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
pub struct AddInstructionRequest {
    pub user_id: String,
    pub instruction: String,
    pub trigger_type: String,
    #[serde(default)]
    pub priority: i64,
}

pub async fn add_instruction(
    State(state): State<AppState>,
    Json(payload): Json<AddInstructionRequest>,
) -> Json<serde_json::Value> {
    let Some(trigger_type) = TriggerType::from_trigger(&payload.trigger_type) else {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("Unknown trigger type: {}", payload.trigger_type),
        }));
    };
    if payload.instruction.trim().is_empty() {
        return Json(serde_json::json!({ "success": false, "error": "Instruction is required" }));
    }

    match state
        .storage
        .add_instruction(
            &payload.user_id,
            &payload.instruction,
            trigger_type,
            payload.priority,
        )
        .await
    {
        Ok(instruction) => {
            Json(serde_json::json!({ "success": true, "instruction": instruction }))
        }
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn remove_instruction(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.storage.remove_instruction(&id).await {
        Ok(true) => Json(serde_json::json!({ "success": true })),
        Ok(false) => Json(serde_json::json!({ "success": false, "error": "Instruction not found" })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
pub struct UpsertCredentialRequest {
    pub user_id: String,
    pub service: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Store a token obtained elsewhere (the OAuth dance itself lives outside
/// this service).
pub async fn upsert_credential(
    State(state): State<AppState>,
    Json(payload): Json<UpsertCredentialRequest>,
) -> Json<serde_json::Value> {
    let Some(service) = Service::from_service(&payload.service) else {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("Unknown service: {}", payload.service),
        }));
    };

    match state
        .credentials
        .upsert(
            &payload.user_id,
            service,
            &payload.access_token,
            payload.refresh_token.as_deref(),
            payload.expires_at,
        )
        .await
    {
        Ok(()) => Json(serde_json::json!({ "success": true })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
pub struct TriggerRequest {
    pub user_id: String,
    pub trigger_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub async fn trigger_proactive(
    State(state): State<AppState>,
    Json(payload): Json<TriggerRequest>,
) -> Json<serde_json::Value> {
    let Some(trigger_type) = TriggerType::from_trigger(&payload.trigger_type) else {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("Unknown trigger type: {}", payload.trigger_type),
        }));
    };

    match state
        .processor
        .trigger_proactive_agent(&payload.user_id, trigger_type, &payload.data)
        .await
    {
        Ok(task) => Json(serde_json::json!({ "success": true, "task": task })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Deserialize)]
pub struct ProactiveEventRequest {
    pub user_id: String,
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub instructions: Option<Vec<String>>,
}

pub async fn proactive_event(
    State(state): State<AppState>,
    Json(payload): Json<ProactiveEventRequest>,
) -> Json<serde_json::Value> {
    let outcome = state
        .processor
        .process_proactive_event(
            &payload.user_id,
            &payload.event_type,
            &payload.data,
            payload.instructions,
        )
        .await;
    Json(serde_json::json!({ "success": outcome.text.is_some(), "outcome": outcome }))
}

/// Tail the live log over SSE.
pub async fn stream_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.log_tx.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|line| line.ok())
        .map(|line| Ok::<_, Infallible>(Event::default().data(line)));
    Sse::new(stream)
}
