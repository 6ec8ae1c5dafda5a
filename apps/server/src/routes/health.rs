use actix_web::{HttpResponse, Responder, get};
use serde_json::json;

macros_utils::routes! {
    route root_route,
    route health_route,
}

/// Service banner
#[get("/")]
pub async fn root_route() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "message": "StreamrP2P Coordinator",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check route
#[get("/health")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "healthy", "service": "coordinator" }))
}
