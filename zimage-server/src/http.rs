use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use zimage_core::{encode_png, Error, GenerationRequest, Loader, Pipeline};

#[derive(Serialize)]
struct ErrorDetail {
    detail: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// An error response: `{"detail": ...}` with the given status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorDetail { detail: self.detail })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        if e.is_client_error() {
            Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                detail: e.to_string(),
            }
        } else {
            tracing::error!("Error generating image: {}", e.traceback());
            Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: format!("Image generation failed: {e}"),
            }
        }
    }
}

/// Every unusable body is a 422, whatever axum would have answered.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: rejection.body_text(),
        }
    }
}

pub fn router<L: Loader>(pipeline: Arc<Pipeline<L>>) -> Router {
    Router::new()
        .route("/generate", post(generate_image_handler::<L>))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

async fn generate_image_handler<L: Loader>(
    State(pipeline): State<Arc<Pipeline<L>>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let request = request.validated()?;
    let image = pipeline.generate(request).await?;
    let png = encode_png(&image).map_err(Error::from)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
