use crate::error::ZoneError;
use crate::pipeline::{encode_jpeg, FrameCursor, PerformanceReport, Pipeline};
use crate::zones::{StatsSnapshot, ZoneId, ZoneSpec, ZoneUpdate, ZoneView};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

const JPEG_QUALITY: i32 = 85;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Zone(ZoneError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Zone(ZoneError::InvalidPolygon(_)) => StatusCode::BAD_REQUEST,
            ApiError::Zone(ZoneError::AlreadyExists(_)) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {:#}", self);
        }
        let body = ErrorBody {
            error: format!("{:#}", self),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct ZoneCreated {
    pub id: ZoneId,
}

pub async fn get_stats(State(pipeline): State<Arc<Pipeline>>) -> Json<StatsSnapshot> {
    Json(pipeline.stats())
}

pub async fn get_zones(State(pipeline): State<Arc<Pipeline>>) -> Json<Vec<ZoneView>> {
    Json(pipeline.zones())
}

pub async fn get_performance(State(pipeline): State<Arc<Pipeline>>) -> Json<PerformanceReport> {
    Json(pipeline.performance())
}

pub async fn replace_zones_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Json(specs): Json<Vec<ZoneSpec>>,
) -> Result<Json<Vec<ZoneId>>, ApiError> {
    Ok(Json(pipeline.replace_all_zones(specs)?))
}

pub async fn add_zone_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Json(spec): Json<ZoneSpec>,
) -> Result<(StatusCode, Json<ZoneCreated>), ApiError> {
    let id = pipeline.add_zone(spec)?;
    Ok((StatusCode::CREATED, Json(ZoneCreated { id })))
}

pub async fn update_zone_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<ZoneId>,
    Json(update): Json<ZoneUpdate>,
) -> Result<StatusCode, ApiError> {
    pipeline.update_zone(id, update)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_zone_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<ZoneId>,
) -> Result<StatusCode, ApiError> {
    pipeline.delete_zone(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Latest annotated frame as JPEG, or 204 before the first one is published.
///
/// Each request reads with a fresh cursor, so HTTP pulls always see the newest frame.
pub async fn get_frame(State(pipeline): State<Arc<Pipeline>>) -> Result<Response, ApiError> {
    let jpeg = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Vec<u8>>> {
        let mut cursor = FrameCursor::default();
        let latest = pipeline.latest_frame_and_stats(&mut cursor)?;
        latest
            .frame
            .map(|frame| encode_jpeg(&frame.image, JPEG_QUALITY))
            .transpose()
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(match jpeg {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}
