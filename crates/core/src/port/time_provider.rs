/// Clock used for submission timestamps and task deadlines.
///
/// Deadlines are absolute epoch millis, so the queue wait of a task is
/// computed against this clock rather than tokio's monotonic one.
pub trait TimeProvider: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
