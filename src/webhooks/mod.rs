//! Inbound payment gateway notifications.

pub mod notification;
pub mod signature;
pub mod status;

pub use notification::Notification;
pub use signature::{WebhookVerifier, SIGNATURE_HEADER};
pub use status::map_native_status;
