use actix_web::{HttpResponse, delete, get, patch, post, web};
use serde::Deserialize;
use serde_json::json;
use streamr_coordinator::database::models::StreamStatus;
use streamr_coordinator::lifecycle::{NewStream, StreamFilter};
use streamr_coordinator::{Coordinator, CoordinatorError};

use crate::error::ApiResult;

// `/streams/live` must be registered before `/streams/{stream_id}`
macros_utils::routes! {
    route live_streams,
    route list_streams,
    route register_stream,
    route get_stream,
    route update_stream_status,
    route stream_history,
    route delete_stream,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    status: StreamStatus,
}

#[post("/streams")]
pub async fn register_stream(coordinator: web::Data<Coordinator>, body: web::Json<NewStream>) -> ApiResult<HttpResponse> {
    let stream = coordinator.lifecycle.register_stream(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(stream))
}

/// List streams, optionally filtered by `?status=` (`ALL` by default)
#[get("/streams")]
pub async fn list_streams(coordinator: web::Data<Coordinator>, query: web::Query<ListQuery>) -> ApiResult<HttpResponse> {
    let filter = match query.status.as_deref() {
        None | Some("") => StreamFilter::All,
        Some(raw) => raw.parse::<StreamFilter>().map_err(CoordinatorError::Validation)?,
    };
    let streams = coordinator.lifecycle.list_streams(filter).await?;
    Ok(HttpResponse::Ok().json(streams))
}

#[get("/streams/live")]
pub async fn live_streams(coordinator: web::Data<Coordinator>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(coordinator.lifecycle.live_streams().await?))
}

#[get("/streams/{stream_id}")]
pub async fn get_stream(coordinator: web::Data<Coordinator>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(coordinator.lifecycle.get_stream(&path).await?))
}

#[patch("/streams/{stream_id}/status")]
pub async fn update_stream_status(
    coordinator: web::Data<Coordinator>,
    path: web::Path<String>,
    body: web::Json<StatusUpdate>,
) -> ApiResult<HttpResponse> {
    let stream = coordinator.lifecycle.transition(&path, body.status).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "updated", "new_state": stream.status })))
}

#[get("/streams/{stream_id}/history")]
pub async fn stream_history(coordinator: web::Data<Coordinator>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(coordinator.lifecycle.transition_history(&path).await?))
}

#[delete("/streams/{stream_id}")]
pub async fn delete_stream(coordinator: web::Data<Coordinator>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let stream_id = path.into_inner();
    coordinator.lifecycle.delete_stream(&stream_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "success", "message": format!("Stream {stream_id} deleted") })))
}
