use actix_web::{HttpResponse, get, post, web};
use serde::Deserialize;
use serde_json::json;
use streamr_coordinator::Coordinator;
use streamr_coordinator::dashboard::{operational_dashboard, parse_node_statuses};
use streamr_coordinator::heartbeat::Heartbeat;

use crate::error::{ApiError, ApiResult};

macros_utils::routes! {
    route heartbeat,
    route dashboard,
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    node_statuses: String,
}

fn default_limit() -> usize {
    10
}

#[post("/nodes/heartbeat")]
pub async fn heartbeat(coordinator: web::Data<Coordinator>, body: web::Json<Heartbeat>) -> ApiResult<HttpResponse> {
    coordinator.heartbeats.record_heartbeat(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "success", "message": "Heartbeat received" })))
}

/// Operational streams with their nodes; unknown node statuses are a 422
#[get("/dashboard")]
pub async fn dashboard(coordinator: web::Data<Coordinator>, query: web::Query<DashboardQuery>) -> ApiResult<HttpResponse> {
    let statuses = parse_node_statuses(&query.node_statuses).map_err(ApiError::unprocessable)?;
    let dashboard = operational_dashboard(&coordinator.database, query.limit, &statuses).await?;
    Ok(HttpResponse::Ok().json(dashboard))
}
