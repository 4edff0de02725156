//! Webhook HTTP server handlers
//!
//! Implements the ValidatingAdmissionWebhook HTTP endpoint for DBUpgrade
//! admission. TLS material is provisioned externally; with the
//! `DISABLE_ADMISSION` flag the server is not started at all and the
//! reconciler's guards are the only enforcement.

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::policies::{ValidationContext, validate_all};
use crate::crd::DBUpgrade;

/// Webhook endpoint path for DBUpgrade admission reviews.
pub const VALIDATE_PATH: &str = "/validate-dbupgrade-example-v1alpha1-dbupgrade";

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

/// AdmissionRequest contains the details of the admission request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Create the webhook router
pub(crate) fn create_webhook_router() -> Router {
    Router::new().route(VALIDATE_PATH, post(validate_db_upgrade))
}

/// Validate DBUpgrade admission webhook handler
pub(crate) async fn validate_db_upgrade(
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let request = match review.request {
        Some(req) => req,
        None => {
            error!("Admission review missing request");
            return (
                StatusCode::BAD_REQUEST,
                Json(create_response(
                    "",
                    false,
                    "Missing request in AdmissionReview",
                    None,
                )),
            );
        }
    };

    let uid = request.uid.clone();
    info!(
        uid = %uid,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // Parse the new object
    let upgrade: DBUpgrade = match request.object {
        Some(obj) => match serde_json::from_value(obj) {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, "Failed to parse DBUpgrade");
                return (
                    StatusCode::OK,
                    Json(create_response(
                        &uid,
                        false,
                        &format!("Failed to parse object: {}", e),
                        None,
                    )),
                );
            }
        },
        None => {
            // DELETE operations carry no object and are always admitted.
            if request.operation == "DELETE" {
                return (StatusCode::OK, Json(create_response(&uid, true, "", None)));
            }
            return (
                StatusCode::OK,
                Json(create_response(
                    &uid,
                    false,
                    "Missing object in request",
                    None,
                )),
            );
        }
    };

    // Parse the old object for UPDATE operations
    let old_upgrade: Option<DBUpgrade> = match &request.old_object {
        Some(obj) => match serde_json::from_value(obj.clone()) {
            Ok(u) => Some(u),
            Err(e) => {
                warn!(error = %e, "Failed to parse old DBUpgrade, treating as CREATE");
                None
            }
        },
        None => None,
    };

    let ctx = ValidationContext::new(&upgrade, old_upgrade.as_ref());
    let result = validate_all(&ctx);

    if result.allowed {
        info!(uid = %uid, "Admission request allowed");
        (StatusCode::OK, Json(create_response(&uid, true, "", None)))
    } else {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
        (
            StatusCode::OK,
            Json(create_response(&uid, false, &message, Some(&reason))),
        )
    }
}

/// Create an AdmissionReview response
fn create_response(
    uid: &str,
    allowed: bool,
    message: &str,
    reason: Option<&str>,
) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed,
            status: if allowed {
                None
            } else {
                Some(AdmissionStatus {
                    code: 403,
                    message: message.to_string(),
                    reason: reason.map(String::from),
                })
            },
        },
    }
}

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves the validate endpoint. TLS certificates
/// are loaded from the given paths.
pub async fn run_webhook_server(cert_path: &str, key_path: &str) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router();

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Debug)]
pub enum WebhookError {
    /// TLS configuration error
    TlsConfig(String),
    /// Server error
    Server(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::TlsConfig(msg) => write!(f, "TLS configuration error: {}", msg),
            WebhookError::Server(msg) => write!(f, "Webhook server error: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}
