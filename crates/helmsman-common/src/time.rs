use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Fallback counter for when the system clock reads before the unix epoch.
static TIMESTAMP_FALLBACK: AtomicU64 = AtomicU64::new(1);

/// Current wall-clock time in milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|_| TIMESTAMP_FALLBACK.fetch_add(1, Ordering::SeqCst))
}
