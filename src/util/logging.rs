//! # Logging Utilities
//!
//! Rate limited logging for conditions that repeat with every byte chunk on a
//! bad link (authentication failures, corrupt telegrams) and bounded hex dumps
//! of frames.
//!
//! ```rust
//! use dsmr_rs::util::logging::LogThrottle;
//!
//! let mut throttle = LogThrottle::new(60_000, 3);
//! if throttle.allow() {
//!     log::warn!("Decrypting Smarty frame failed");
//! }
//! ```

use std::time::Instant;

/// Maximum number of bytes written by [`log_frame_hex`].
const MAX_LOG_BYTES: usize = 64;

/// Caps the number of messages logged per time window.
#[derive(Debug)]
pub struct LogThrottle {
    window_ms: u64,
    cap: u32,
    count: u32,
    suppressed: u64,
    t0: Instant,
}

impl LogThrottle {
    /// Allow `cap` messages every `window_ms` milliseconds.
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Returns `true` when the next message may be logged.
    pub fn allow(&mut self) -> bool {
        if self.t0.elapsed().as_millis() as u64 > self.window_ms {
            if self.suppressed > 0 {
                log::debug!("{} log messages suppressed in last window", self.suppressed);
            }
            self.t0 = Instant::now();
            self.count = 0;
            self.suppressed = 0;
        }

        self.count = self.count.saturating_add(1);
        let allowed = self.count <= self.cap;
        if !allowed {
            self.suppressed += 1;
        }
        allowed
    }

    /// Messages swallowed in the current window.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Start a fresh window.
    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
        self.suppressed = 0;
    }
}

/// Log a warning through a [`LogThrottle`].
#[macro_export]
macro_rules! log_warn_throttled {
    ($throttle:expr, $($arg:tt)*) => {
        if $throttle.allow() {
            log::warn!($($arg)*);
        }
    };
}

/// Trace level hex dump of a frame, truncated to 64 bytes.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }

    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let hex_str = crate::util::hex::format_hex_compact(shown);
    if data.len() > MAX_LOG_BYTES {
        log::trace!("{prefix}: {hex_str} ... ({} bytes total)", data.len());
    } else {
        log::trace!("{prefix}: {hex_str}");
    }
}
