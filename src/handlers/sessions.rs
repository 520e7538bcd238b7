//! # Session Control Endpoints
//!
//! - `POST   /api/v1/sessions` - join a room and start a session
//! - `GET    /api/v1/sessions` - list registered sessions
//! - `GET    /api/v1/sessions/{session_id}` - connection/turn state and history
//! - `GET    /api/v1/sessions/{session_id}/metrics` - latency summary so far
//! - `DELETE /api/v1/sessions/{session_id}` - end the session, return final metrics
//!
//! Credentials are issued elsewhere; the caller passes one in.

use crate::agent::CreateSession;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn create_session(
    state: web::Data<AppState>,
    body: web::Json<CreateSession>,
) -> Result<HttpResponse, AppError> {
    let snapshot = state.sessions.create_session(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(snapshot))
}

pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let sessions = state.sessions.list();
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let snapshot = state.sessions.snapshot(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

pub async fn get_session_metrics(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let summary = state.sessions.get_metrics(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn end_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let summary = state.sessions.end_session(&session_id).await?;
    info!(session_id = %session_id, "Session ended by request");
    Ok(HttpResponse::Ok().json(summary))
}
