// Time Provider Port (for testability)

/// Time provider interface (allows mocking in tests)
///
/// Staleness and timeout detection compare against `updated` timestamps, so
/// all times come from one injectable source rather than scattered clock
/// reads.
pub trait TimeProvider: Send + Sync {
    /// Current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
