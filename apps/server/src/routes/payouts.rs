use actix_web::{HttpResponse, get, web};
use serde::Deserialize;
use serde_json::json;
use streamr_coordinator::Coordinator;

use crate::error::ApiResult;

macros_utils::routes! {
    route payouts,
    route node_earnings,
    route leaderboard,
}

#[derive(Debug, Deserialize)]
pub struct PayoutQuery {
    #[serde(default = "default_hours_back")]
    hours_back: i64,
}

#[derive(Debug, Deserialize)]
pub struct EarningsQuery {
    #[serde(default = "default_days_back")]
    days_back: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_hours_back() -> i64 {
    1
}

fn default_days_back() -> i64 {
    7
}

fn default_limit() -> usize {
    10
}

#[get("/payouts")]
pub async fn payouts(coordinator: web::Data<Coordinator>, query: web::Query<PayoutQuery>) -> ApiResult<HttpResponse> {
    let report = coordinator.payouts.calculate_payouts(query.hours_back).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "calculation_time": format!("Last {} hour(s)", query.hours_back),
        "payouts": report,
    })))
}

#[get("/nodes/{node_id}/earnings")]
pub async fn node_earnings(
    coordinator: web::Data<Coordinator>,
    path: web::Path<String>,
    query: web::Query<EarningsQuery>,
) -> ApiResult<HttpResponse> {
    let summary = coordinator.payouts.node_earnings_summary(&path, query.days_back).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[get("/leaderboard")]
pub async fn leaderboard(coordinator: web::Data<Coordinator>, query: web::Query<LeaderboardQuery>) -> ApiResult<HttpResponse> {
    let entries = coordinator.payouts.leaderboard(query.limit).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "success", "leaderboard": entries })))
}
