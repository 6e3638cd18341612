use std::{env, sync::OnceLock};

/// Whether `TERN_VERIFY_HEAP` requests heap verification
/// before and after every collection.
pub fn verify_heap() -> bool {
    static CACHE: OnceLock<bool> = OnceLock::new();
    *CACHE.get_or_init(|| env::var("TERN_VERIFY_HEAP").is_ok())
}

/// Whether `TERN_GC_LOG_OBJECTS` requests a trace event for
/// every forwarded, moved or freed object.
pub fn log_objects() -> bool {
    static CACHE: OnceLock<bool> = OnceLock::new();
    *CACHE.get_or_init(|| env::var("TERN_GC_LOG_OBJECTS").is_ok())
}
