pub mod policies;
pub mod server;

pub use server::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookError, run_webhook_server};
