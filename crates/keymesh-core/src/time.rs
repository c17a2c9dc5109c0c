/// Current wall-clock time as Unix seconds (UTC).
///
/// Timestamps throughout the overlay are unsigned; a pre-epoch clock clamps
/// to zero rather than wrapping.
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
