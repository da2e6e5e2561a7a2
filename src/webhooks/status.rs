use crate::models::payment::PaymentStatus;

/// Maps a gateway status word to the internal vocabulary.
///
/// Unknown words map to `Pending` so an unexpected value can never settle a
/// payment.
pub fn map_native_status(native: &str) -> PaymentStatus {
    match native.trim().to_ascii_uppercase().as_str() {
        "PAID" | "SETTLED" | "SUCCEEDED" | "COMPLETED" | "CAPTURED" => PaymentStatus::Settlement,
        "EXPIRED" | "FAILED" | "VOIDED" | "INACTIVE" | "CANCELLED" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}
