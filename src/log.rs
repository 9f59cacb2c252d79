use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{fmt, EnvFilter};

/// Global flag to control verbose DSP logging
pub static DSP_DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Install a fmt subscriber honouring `RUST_LOG`, falling back to `default_filter`
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Set DSP debug logging on/off
pub fn set_dsp_debug(enabled: bool) {
    DSP_DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
    tracing::info!("🔧 DSP debug logging {}", if enabled { "ENABLED" } else { "DISABLED" });
}

/// Check if DSP debug logging is enabled
pub fn is_dsp_debug_enabled() -> bool {
    DSP_DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// DSP debug macro - only logs if DSP debug is enabled
#[macro_export]
macro_rules! dsp_debug {
    ($($arg:tt)*) => {
        if $crate::log::DSP_DEBUG_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::debug!($($arg)*);
        }
    };
}
