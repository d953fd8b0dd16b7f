//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. An explicit path (`--config`)
//! 2. `qsc.toml` next to the executable
//! 3. `$HOME/.config/qsc/config.toml` (`%LOCALAPPDATA%\qsc\config.toml` on Windows)
//! 4. Built-in defaults
//!
//! Environment variables (`QSC_LOG_LEVEL`, `QSC_BIT_COUNT`, `QSC_SEED`,
//! `QSC_QBER_THRESHOLD`) override file values; CLI arguments override both.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cascade::CascadeParams;
use crate::channel::ChannelMode;
use crate::error::{QscError, Result, ResultExt as _};
use crate::util;

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QscConfig {
    pub session: SessionConfig,
    pub channel: ChannelConfig,
    pub keys: KeysConfig,
    pub logging: LoggingConfig,
}

/// Parameters of one key-agreement run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of raw bits the sender transmits.
    pub bit_count: usize,
    /// Seed for the simulation RNG.  `None` selects the cryptographic RNG.
    pub seed: Option<u64>,
    /// Fraction of the sifted key disclosed for QBER estimation.
    /// `None` skips the estimate.
    pub qber_sample_fraction: Option<f64>,
    pub qber_threshold: f64,
    pub block_size: usize,
    pub cascade_passes: usize,
    pub verify_rounds: usize,
    pub max_bisections: usize,
    /// Bits subtracted from the extractable length on top of the leakage.
    pub security_margin: usize,
    pub output_bits: usize,
    /// Probability that an intercept-resend eavesdropper measures a qubit.
    pub eavesdrop_rate: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub mode: ChannelMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub rsa_bits: usize,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines log file.  Empty string means no file logging.
    pub json_log_file: String,
    /// Emit JSON to stdout instead of human-readable stderr output.
    pub json_stdout: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SessionConfig {
    fn default() -> Self {
        let cascade = CascadeParams::default();
        Self {
            bit_count: 4096,
            seed: None,
            qber_sample_fraction: Some(0.1),
            qber_threshold: 0.11,
            block_size: cascade.block_size,
            cascade_passes: cascade.passes,
            verify_rounds: cascade.verify_rounds,
            max_bisections: cascade.max_bisections,
            security_margin: 64,
            output_bits: 256,
            eavesdrop_rate: 0.0,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            rsa_bits: crate::asymmetric::DEFAULT_MODULUS_BITS,
            dir: PathBuf::from("qsc-keys"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl SessionConfig {
    pub fn cascade_params(&self) -> CascadeParams {
        CascadeParams {
            block_size: self.block_size,
            passes: self.cascade_passes,
            verify_rounds: self.verify_rounds,
            max_bisections: self.max_bisections,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bit_count == 0 {
            return Err(QscError::InvalidConfiguration(
                "bit_count must be positive".into(),
            ));
        }
        if let Some(fraction) = self.qber_sample_fraction {
            util::validate_fraction(fraction, "qber_sample_fraction", true)?;
        }
        util::validate_qber_threshold(self.qber_threshold)?;
        util::validate_fraction(self.eavesdrop_rate, "eavesdrop_rate", false)?;
        if self.block_size < 2 {
            return Err(QscError::InvalidConfiguration(format!(
                "block_size {} must be at least 2",
                self.block_size
            )));
        }
        if self.cascade_passes == 0 {
            return Err(QscError::InvalidConfiguration(
                "cascade_passes must be positive".into(),
            ));
        }
        if self.output_bits == 0 {
            return Err(QscError::InvalidConfiguration(
                "output_bits must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl QscConfig {
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.keys.rsa_bits < crate::asymmetric::MIN_MODULUS_BITS {
            return Err(QscError::InvalidConfiguration(format!(
                "rsa_bits {} below minimum {}",
                self.keys.rsa_bits,
                crate::asymmetric::MIN_MODULUS_BITS
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: QscConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        Ok(cfg)
    }

    /// Load config using the standard search order (see module docs).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("qsc.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        #[cfg(windows)]
        {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                let candidate = PathBuf::from(local).join("qsc").join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(home) = std::env::var_os("HOME") {
                let candidate = PathBuf::from(home)
                    .join(".config")
                    .join("qsc")
                    .join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("QSC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(bits) = std::env::var("QSC_BIT_COUNT") {
            self.session.bit_count = bits.trim().parse().ctx_config("QSC_BIT_COUNT")?;
        }
        if let Ok(seed) = std::env::var("QSC_SEED") {
            self.session.seed = Some(seed.trim().parse().ctx_config("QSC_SEED")?);
        }
        if let Ok(threshold) = std::env::var("QSC_QBER_THRESHOLD") {
            self.session.qber_threshold =
                threshold.trim().parse().ctx_config("QSC_QBER_THRESHOLD")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
