//! Runtime mode configuration.
//!
//! The runtime mode is set via the `TINYSTL_MODE` environment variable:
//! - `strict` (default): precondition violations (double free, mismatched
//!   size on deallocate, foreign pointers) are not checked. The pool behaves
//!   exactly like the raw free-list design.
//! - `hardened`: the pool tracks every live small block and aborts on a
//!   precondition violation instead of corrupting its free lists.
//! - `off`: reachable only through the API, for benchmarking baselines.

use std::sync::OnceLock;

use crate::malloc::size_class::REFILL_BATCH;

/// Checking level applied by allocator instances.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// No runtime checks. Violations are undefined behavior at the memory
    /// layer.
    #[default]
    Strict,
    /// Live-block tracking with abort-on-violation.
    Hardened,
    /// No checks and no lifecycle logging.
    Off,
}

impl SafetyLevel {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "strict" | "default" => Self::Strict,
            "hardened" | "checked" | "debug" => Self::Hardened,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Strict,
        }
    }

    /// Returns true if precondition violations are detected.
    #[must_use]
    pub const fn checks_enabled(self) -> bool {
        matches!(self, Self::Hardened)
    }

    /// Returns true if lifecycle records are kept.
    #[must_use]
    pub const fn logging_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Environment variable selecting the default [`SafetyLevel`].
pub const MODE_ENV_VAR: &str = "TINYSTL_MODE";

/// Maps a `TINYSTL_MODE` value to a level. Unset or unknown values mean
/// `Strict`; `Off` cannot be selected from the environment.
#[must_use]
pub fn level_from_env_value(raw: Option<&str>) -> SafetyLevel {
    match raw.map(SafetyLevel::from_str_loose) {
        Some(SafetyLevel::Hardened) => SafetyLevel::Hardened,
        _ => SafetyLevel::Strict,
    }
}

/// The process-wide default level, read from `TINYSTL_MODE` on first use.
///
/// Every caller, including ones racing the first read, observes the same
/// resolved level.
#[must_use]
pub fn safety_level() -> SafetyLevel {
    static LEVEL: OnceLock<SafetyLevel> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        let raw = std::env::var(MODE_ENV_VAR).ok();
        level_from_env_value(raw.as_deref())
    })
}

/// Default bound on retained lifecycle records per allocator instance.
pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// Largest accepted [`PoolConfig::refill_batch`]. Larger values are clamped.
pub const MAX_REFILL_BATCH: usize = 1024;

/// Construction-time knobs of a pool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Checking level for this instance.
    pub level: SafetyLevel,
    /// Number of blocks requested from the arena when a class list is empty.
    /// Pools clamp it to `1..=MAX_REFILL_BATCH`.
    pub refill_batch: usize,
    /// Maximum number of lifecycle records retained before the oldest are
    /// dropped.
    pub log_capacity: usize,
}

impl PoolConfig {
    /// Config with the given level and default sizing.
    #[must_use]
    pub const fn with_level(level: SafetyLevel) -> Self {
        Self {
            level,
            refill_batch: REFILL_BATCH,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// Same config with `refill_batch` forced into `1..=MAX_REFILL_BATCH`.
    #[must_use]
    pub const fn normalized(self) -> Self {
        let refill_batch = if self.refill_batch == 0 {
            1
        } else if self.refill_batch > MAX_REFILL_BATCH {
            MAX_REFILL_BATCH
        } else {
            self.refill_batch
        };
        Self {
            refill_batch,
            ..self
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::with_level(safety_level())
    }
}
