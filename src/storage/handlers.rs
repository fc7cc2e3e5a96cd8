use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use super::protocol::{GetResponse, PutRequest, PutResponse};
use super::store::{Store, StoreStats};
use super::{StoreKey, StoreValue};
use crate::error::StoreError;

/// HTTP status for a failed store operation.
pub fn status_for(error: &StoreError) -> StatusCode {
    match error {
        StoreError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        StoreError::EmptyView
        | StoreError::NotOpen
        | StoreError::Closed
        | StoreError::Join(_)
        | StoreError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::UnsupportedCommand(_) | StoreError::UnmatchedReply(_) | StoreError::Codec(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn put_failure(status: StatusCode, error: String) -> (StatusCode, Json<PutResponse>) {
    (
        status,
        Json(PutResponse {
            success: false,
            previous_json: None,
            error: Some(error),
        }),
    )
}

fn get_failure(status: StatusCode, error: Option<String>) -> (StatusCode, Json<GetResponse>) {
    (
        status,
        Json(GetResponse {
            value_json: None,
            error,
        }),
    )
}

pub async fn handle_put<K, V>(
    Extension(store): Extension<Arc<Store<K, V>>>,
    Json(req): Json<PutRequest>,
) -> (StatusCode, Json<PutResponse>)
where
    K: StoreKey + FromStr,
    <K as FromStr>::Err: Display,
    V: StoreValue,
{
    let key: K = match req.key.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return put_failure(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let value: V = match serde_json::from_str(&req.value_json) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to deserialize value: {}", e);
            return put_failure(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let previous = match store.put(key, value).await {
        Ok(previous) => previous,
        Err(e) => {
            tracing::error!("Failed to put: {}", e);
            return put_failure(status_for(&e), e.to_string());
        }
    };

    match previous.map(|v| serde_json::to_string(&v)).transpose() {
        Ok(previous_json) => (
            StatusCode::OK,
            Json(PutResponse {
                success: true,
                previous_json,
                error: None,
            }),
        ),
        Err(e) => put_failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn handle_get<K, V>(
    Extension(store): Extension<Arc<Store<K, V>>>,
    Path(key_str): Path<String>,
) -> (StatusCode, Json<GetResponse>)
where
    K: StoreKey + FromStr,
    <K as FromStr>::Err: Display,
    V: StoreValue,
{
    let key: K = match key_str.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return get_failure(StatusCode::BAD_REQUEST, Some(e.to_string()));
        }
    };

    match store.get(&key).await {
        Ok(Some(value)) => match serde_json::to_string(&value) {
            Ok(value_json) => (
                StatusCode::OK,
                Json(GetResponse {
                    value_json: Some(value_json),
                    error: None,
                }),
            ),
            Err(e) => get_failure(StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string())),
        },
        Ok(None) => get_failure(StatusCode::NOT_FOUND, None),
        Err(e) => {
            tracing::warn!("GET {} failed: {}", key_str, e);
            get_failure(status_for(&e), Some(e.to_string()))
        }
    }
}

pub async fn handle_stats<K, V>(
    Extension(store): Extension<Arc<Store<K, V>>>,
) -> Result<Json<StoreStats>, StatusCode>
where
    K: StoreKey,
    V: StoreValue,
{
    store
        .stats()
        .map(Json)
        .map_err(|e| status_for(&e))
}
