pub mod config;
pub mod models;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub enum AppError {
    Status(StatusCode),
    /// A failure with a message the caller is meant to see, e.g. an upstream GitHub error.
    Message(StatusCode, String),
    Internal(anyhow::Error),
}

#[derive(serde::Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Status(status) if status == StatusCode::NOT_FOUND => {
                (status, Json(ErrorBody { detail: "Not found" })).into_response()
            }
            Self::Status(status) => status.into_response(),
            Self::Message(status, message) => {
                if status.is_server_error() {
                    tracing::error!("{} {}", status, message);
                } else {
                    tracing::info!("{} {}", status, message);
                }
                (status, Json(ErrorBody { detail: &message })).into_response()
            }
            Self::Internal(err) => {
                tracing::error!("{:?}", err);
                let detail = format!("Something went wrong: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { detail: &detail }))
                    .into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self { Self::Internal(err.into()) }
}
