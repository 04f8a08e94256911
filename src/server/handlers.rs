//! Route handlers
//!
//! Handlers never fail the request because the hub is unavailable; they
//! render whatever the dashboard could gather.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use chrono::{Local, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;

use crate::dashboard::{Dashboard, DashboardData};

use super::html;

type AppState = State<Arc<Dashboard>>;

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub async fn index(State(dashboard): AppState) -> Html<String> {
    let data = dashboard.data(now()).await;
    Html(html::dashboard_page(&data))
}

pub async fn area(State(dashboard): AppState, Path(area_id): Path<String>) -> Html<String> {
    let view = dashboard.area(&area_id).await;
    Html(html::area_page(&view))
}

pub async fn data(State(dashboard): AppState) -> Json<DashboardData> {
    Json(dashboard.data(now()).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivateParams {
    pub format: Option<String>,
}

/// Programmatic callers get JSON, browsers get sent back to the dashboard
fn wants_json(headers: &HeaderMap, params: &ActivateParams) -> bool {
    params.format.as_deref() == Some("json")
        || header_text(headers, "accept").is_some_and(|v| v.contains("application/json"))
        || header_text(headers, "x-requested-with")
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn activate(
    State(dashboard): AppState,
    Path(entity_id): Path<String>,
    Query(params): Query<ActivateParams>,
    headers: HeaderMap,
) -> Response {
    let outcome = dashboard.activate(&entity_id).await;

    if wants_json(&headers, &params) {
        let status = if outcome.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(outcome)).into_response()
    } else {
        Redirect::to("/").into_response()
    }
}

pub async fn refresh_cache(State(dashboard): AppState) -> Response {
    match dashboard.refresh(now()).await {
        Ok(most_used) => Json(json!({
            "success": true,
            "message": "Rankings recomputed; entities and areas refreshing in the background",
            "most_used": most_used,
        }))
        .into_response(),
        Err(err) => {
            log::error!("Manual refresh failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": format!("{err:#}") })),
            )
                .into_response()
        }
    }
}

/// Liveness plus what the cache currently holds
pub async fn health(State(dashboard): AppState) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "cache": dashboard.cache().status(),
    }))
}
