use axum::{
    Json,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::QuerySearchError;
use crate::pipeline::SearchPipeline;
use crate::types;

use super::models::{ErrorBody, HealthResponse, SearchRequest};

pub const REQUESTER_HEADER: &str = "x-requester-id";

impl IntoResponse for QuerySearchError {
    fn into_response(self) -> Response {
        let status = match &self {
            QuerySearchError::Validation(_) => StatusCode::BAD_REQUEST,
            QuerySearchError::Embedding(_) => StatusCode::BAD_GATEWAY,
            QuerySearchError::Retrieval(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

pub async fn search_handler(
    State(pipeline): State<Arc<SearchPipeline>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<types::SearchResponse>, Response> {
    let Json(request) = payload.map_err(reject_body)?;

    let requester_id = headers
        .get(REQUESTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let origin_address = forwarded_for(&headers).or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()));

    let response = pipeline
        .search_query(types::SearchRequest {
            query: request.query,
            requester_id,
            origin_address,
            bypass_cache: request.bypass_cache,
        })
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(Json(response))
}

/// Malformed or mistyped bodies get the same error shape as pipeline errors.
fn reject_body(rejection: JsonRejection) -> Response {
    (
        rejection.status(),
        Json(ErrorBody::new("bad_request", rejection.body_text())),
    )
        .into_response()
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// First hop of `x-forwarded-for`, if present.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[test]
fn test_forwarded_for_takes_first_hop() {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
    assert_eq!(forwarded_for(&headers).as_deref(), Some("203.0.113.7"));

    assert_eq!(forwarded_for(&HeaderMap::new()), None);
}
