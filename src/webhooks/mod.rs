//! Webhook module: HTTP endpoints and the built-in rules they run.
//!
//! - `server`: `/mutate`, `/validate`, and `/review` handlers
//! - `policies`: built-in mutators and validators selectable from the rule file

pub mod policies;
mod server;

pub use server::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookListener,
    WebhookState, create_webhook_router,
};
