use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::AppState;
use crate::purchase::{PurchaseEvent, PurchaseEventError, parse_purchase_event};
use crate::purchase_store::PurchaseStoreError;
use crate::signature::{SignatureError, signature_preconditions};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub const BODY_OK: &str = "OK";
pub const BODY_METHOD_NOT_ALLOWED: &str = "Method not allowed";
pub const BODY_UNAUTHORIZED: &str = "Unauthorized";
pub const BODY_NO_EMAIL: &str = "No email provided";
pub const BODY_INTERNAL_ERROR: &str = "Internal error";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("method {0} is not allowed")]
    MethodNotAllowed(Method),
    #[error("signature rejected: {0}")]
    Unauthorized(#[from] SignatureError),
    #[error("purchase event has no buyer email")]
    MissingEmail,
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error(transparent)]
    Decode(serde_json::Error),
    #[error(transparent)]
    Store(#[from] PurchaseStoreError),
}

impl From<PurchaseEventError> for WebhookError {
    fn from(error: PurchaseEventError) -> Self {
        match error {
            PurchaseEventError::MissingEmail => Self::MissingEmail,
            PurchaseEventError::Decode(source) => Self::Decode(source),
        }
    }
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::MissingEmail => StatusCode::BAD_REQUEST,
            Self::Body(_) | Self::Decode(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_body(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed(_) => BODY_METHOD_NOT_ALLOWED,
            Self::Unauthorized(_) => BODY_UNAUTHORIZED,
            Self::MissingEmail => BODY_NO_EMAIL,
            Self::Body(_) | Self::Decode(_) | Self::Store(_) => BODY_INTERNAL_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match &self {
            Self::MethodNotAllowed(method) => {
                tracing::debug!(
                    target: "blueprint.webhook",
                    method = %method,
                    "rejected non-POST webhook request",
                );
            }
            Self::Unauthorized(reason) => {
                tracing::warn!(
                    target: "blueprint.webhook",
                    reason = reason.reason(),
                    "rejected webhook with invalid signature",
                );
            }
            Self::MissingEmail => {
                tracing::warn!(
                    target: "blueprint.webhook",
                    "purchase event rejected: no buyer email",
                );
            }
            Self::Body(_) | Self::Decode(_) | Self::Store(_) => {
                tracing::error!(
                    target: "blueprint.webhook",
                    error = %self,
                    "purchase webhook failed",
                );
            }
        }

        let mut response = text_response(self.status(), self.public_body());
        if matches!(self, Self::MethodNotAllowed(_)) {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response {
    (status, [(CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
}

pub(crate) async fn purchase_webhook(State(state): State<AppState>, request: Request) -> Response {
    match handle_purchase_webhook(&state, request).await {
        Ok(()) => text_response(StatusCode::OK, BODY_OK),
        Err(error) => error.into_response(),
    }
}

async fn handle_purchase_webhook(state: &AppState, request: Request) -> Result<(), WebhookError> {
    if request.method() != Method::POST {
        return Err(WebhookError::MethodNotAllowed(request.method().clone()));
    }

    let (parts, body) = request.into_parts();
    let signature =
        signature_preconditions(state.config.webhook_secret.as_deref(), &parts.headers)?;

    let body = to_bytes(body, state.config.webhook_max_body_bytes)
        .await
        .map_err(|error| WebhookError::Body(error.to_string()))?;

    signature.verify(&body)?;

    match parse_purchase_event(&body)? {
        PurchaseEvent::Completed { event_name, input } => {
            let record = state.purchases.upsert_purchase(input).await?;
            tracing::info!(
                target: "blueprint.webhook",
                event_name = %event_name,
                email = %record.email,
                order_id = record.order_id.as_deref().unwrap_or("-"),
                backend = state.purchases.backend_name(),
                "recorded verified purchase",
            );
        }
        PurchaseEvent::Ignored { event_name } => {
            tracing::info!(
                target: "blueprint.webhook",
                event_name = event_name.as_deref().unwrap_or("-"),
                "ignored webhook event",
            );
        }
    }

    Ok(())
}
