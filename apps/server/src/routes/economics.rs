use actix_web::{HttpResponse, get, post, web};
use streamr_coordinator::Coordinator;
use streamr_coordinator::economics::BandwidthReport;

use crate::error::ApiResult;

macros_utils::routes! {
    route bandwidth_report,
    route economics_dashboard,
    route node_economics,
}

/// Unverified bandwidth claim from a node attached to the session's stream
#[post("/sessions/{session_id}/bandwidth-report")]
pub async fn bandwidth_report(
    coordinator: web::Data<Coordinator>,
    path: web::Path<String>,
    body: web::Json<BandwidthReport>,
) -> ApiResult<HttpResponse> {
    let entry = coordinator.economics.record_bandwidth_report(&path, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(entry))
}

#[get("/economics/dashboard")]
pub async fn economics_dashboard(coordinator: web::Data<Coordinator>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(coordinator.economics.dashboard().await?))
}

#[get("/economics/node/{node_id}")]
pub async fn node_economics(coordinator: web::Data<Coordinator>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(coordinator.economics.node_economics(&path).await?))
}
