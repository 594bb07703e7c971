//! Codec and Coordinator Configuration
//!
//! Immutable codec parameters and the repair coordinator's environment
//! options. The coordinator recognizes two dotted keys, matching the
//! deployment configuration surface:
//!
//! - `reconstruction.striped-read.timeout.ms`: per-wait completion timeout
//! - `reconstruction.striped-read.buffer.size`: per-reader buffer ceiling
//!
//! The effective read buffer is rounded up to a multiple of [`CHUNK_SIZE`].

use std::time::Duration;

use crate::error::{Error, Result};
use crate::gf::FIELD_SIZE;

/// Configuration key for the per-wait completion timeout in milliseconds.
pub const STRIPED_READ_TIMEOUT_KEY: &str = "reconstruction.striped-read.timeout.ms";

/// Configuration key for the per-reader read buffer ceiling in bytes.
pub const STRIPED_READ_BUFFER_KEY: &str = "reconstruction.striped-read.buffer.size";

/// Default per-wait completion timeout.
pub const DEFAULT_STRIPED_READ_TIMEOUT_MS: u64 = 5_000;

/// Default read buffer ceiling.
pub const DEFAULT_STRIPED_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Read buffers are aligned up to this chunk size.
pub const CHUNK_SIZE: usize = 512;

// =============================================================================
// Codec Options
// =============================================================================

/// Immutable parameters of a trace-repair codec instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    /// Number of data units (k)
    pub data_units: usize,

    /// Number of parity units (m)
    pub parity_units: usize,

    /// Codec scheme name; the trace-repair scheme is `"tr"`
    pub codec_name: String,

    /// Dump generator matrices and tables at debug level on construction
    pub allow_verbose_dump: bool,
}

impl CodecOptions {
    /// Options for the standard trace-repair profile (6 data + 3 parity).
    pub fn tr_default() -> Self {
        Self {
            data_units: 6,
            parity_units: 3,
            codec_name: "tr".to_string(),
            allow_verbose_dump: false,
        }
    }

    /// Total number of units (n = k + m).
    #[inline]
    pub fn all_units(&self) -> usize {
        self.data_units + self.parity_units
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<()> {
        if self.data_units == 0 {
            return Err(Error::InvalidArgument("data_units must be > 0".into()));
        }
        if self.parity_units == 0 {
            return Err(Error::InvalidArgument("parity_units must be > 0".into()));
        }
        if self.all_units() >= FIELD_SIZE {
            return Err(Error::InvalidArgument(format!(
                "invalid data_units and parity_units: {} + {} must be < {}",
                self.data_units, self.parity_units, FIELD_SIZE
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Repair Configuration
// =============================================================================

/// Environment configuration of the repair coordinator.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Per-wait timeout on the read completion queue
    pub striped_read_timeout: Duration,

    /// Per-reader read buffer ceiling in bytes; aligned up to [`CHUNK_SIZE`]
    pub read_buffer_size: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            striped_read_timeout: Duration::from_millis(DEFAULT_STRIPED_READ_TIMEOUT_MS),
            read_buffer_size: DEFAULT_STRIPED_READ_BUFFER_SIZE,
        }
    }
}

impl RepairConfig {
    /// Build a configuration from `(key, value)` option pairs.
    ///
    /// Unrecognized keys are ignored so a full deployment configuration can
    /// be passed through; malformed values for recognized keys fail with
    /// `InvalidArgument`.
    pub fn from_options<'a, I>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            match key {
                STRIPED_READ_TIMEOUT_KEY => {
                    let ms: u64 = value.parse().map_err(|_| {
                        Error::InvalidArgument(format!(
                            "{}: expected milliseconds, got {:?}",
                            key, value
                        ))
                    })?;
                    config.striped_read_timeout = Duration::from_millis(ms);
                }
                STRIPED_READ_BUFFER_KEY => {
                    let bytes: usize = value.parse().map_err(|_| {
                        Error::InvalidArgument(format!(
                            "{}: expected bytes, got {:?}",
                            key, value
                        ))
                    })?;
                    if bytes == 0 {
                        return Err(Error::InvalidArgument(format!(
                            "{}: buffer size must be > 0",
                            key
                        )));
                    }
                    config.read_buffer_size = bytes;
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Effective buffer size: the configured ceiling aligned up to
    /// [`CHUNK_SIZE`].
    pub fn effective_buffer_size(&self) -> usize {
        self.read_buffer_size.div_ceil(CHUNK_SIZE) * CHUNK_SIZE
    }
}

// =============================================================================
// Tests
// =============================================================================
