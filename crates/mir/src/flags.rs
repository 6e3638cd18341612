use std::{env, sync::OnceLock};

/// Whether `TERN_GVN_DISABLE` asks value numbering to stop after
/// discovery and leave the graph unmodified.
pub fn gvn_rewrite_disabled() -> bool {
    static CACHE: OnceLock<bool> = OnceLock::new();
    *CACHE.get_or_init(|| env::var("TERN_GVN_DISABLE").is_ok())
}
