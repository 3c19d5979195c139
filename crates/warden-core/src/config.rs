//! Configuration module
//!
//! Everything is read from the environment (with `.env` support) once at start-up.
//! Each section maps to one pipeline stage so stages can be constructed from their own slice.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{DEFAULT_HARD_MAX_BYTES, DEFAULT_HEADER_WINDOW_BYTES, MIN_HEADER_WINDOW_BYTES};
use crate::models::DetectorKind;

const DETECTOR_TIMEOUT_MS: u64 = 5_000;
const VALIDATE_TIMEOUT_MS: u64 = 30_000;
const SCAN_MAX_ATTEMPTS: u32 = 3;
const SCAN_BACKOFF_MS: u64 = 200;
const SCAN_MAX_BACKOFF_MS: u64 = 5_000;
const CIRCUIT_THRESHOLD: u64 = 5;
const CIRCUIT_DECAY_SECS: u64 = 60;
const CSV_MIN_CONSISTENCY: f64 = 0.6;
const CSV_SAMPLE_LINES: usize = 50;
const MAX_IMAGE_PIXELS: u64 = 40_000_000;
const CLEANUP_LOCK_TIMEOUT_MS: u64 = 2_000;
const CLEANUP_MAX_AGE_HOURS: i64 = 24;
const CLEANUP_SWEEP_INTERVAL_SECS: u64 = 900;
const SCAN_COPY_MAX_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Process-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub log_format: LogFormat,
    /// Postgres connection string. `None` selects the in-memory stores.
    pub database_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub disk: String,
    pub quarantine_dir: PathBuf,
    pub profiles_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ValidationSettings {
    pub hard_max_bytes: u64,
    pub header_window_bytes: usize,
    pub allow_mime_mismatch: bool,
    pub validate_timeout: Duration,
    pub csv_min_consistency: f64,
    pub csv_sample_lines: usize,
    pub max_image_pixels: u64,
}

#[derive(Clone, Debug)]
pub struct ScanSettings {
    /// Global kill switch; can only turn scanning off.
    pub scanning_disabled: bool,
    /// Active detectors in invocation order.
    pub detectors: Vec<DetectorKind>,
    pub clamd_host: String,
    pub clamd_port: u16,
    pub clamscan_path: String,
    pub yara_path: String,
    pub yara_rules: Option<PathBuf>,
    pub binary_allowlist: Vec<PathBuf>,
    pub scratch_dir: PathBuf,
    pub copy_max_bytes: u64,
    pub detector_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub circuit_threshold: u64,
    pub circuit_decay: Duration,
}

#[derive(Clone, Debug)]
pub struct CleanupSettings {
    pub lock_timeout: Duration,
    pub max_age: chrono::Duration,
    pub sweep_interval: Duration,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct WardenConfig {
    pub base: BaseConfig,
    pub storage: StorageSettings,
    pub validation: ValidationSettings,
    pub scan: ScanSettings,
    pub cleanup: CleanupSettings,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl WardenConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("WARDEN_ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let log_format = match env::var("WARDEN_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let base = BaseConfig {
            environment,
            log_format,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
        };

        let root = PathBuf::from(
            env::var("WARDEN_STORAGE_ROOT").unwrap_or_else(|_| "./var/storage".to_string()),
        );
        let storage = StorageSettings {
            quarantine_dir: env::var("WARDEN_QUARANTINE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./var/quarantine")),
            disk: env::var("WARDEN_STORAGE_DISK").unwrap_or_else(|_| "local".to_string()),
            profiles_path: env::var("WARDEN_PROFILES_PATH").ok().map(PathBuf::from),
            root,
        };

        let validation = ValidationSettings {
            hard_max_bytes: env_or("WARDEN_HARD_MAX_BYTES", DEFAULT_HARD_MAX_BYTES),
            header_window_bytes: env_or("WARDEN_HEADER_WINDOW_BYTES", DEFAULT_HEADER_WINDOW_BYTES),
            allow_mime_mismatch: env_bool("WARDEN_ALLOW_MIME_MISMATCH", false),
            validate_timeout: Duration::from_millis(env_or(
                "WARDEN_VALIDATE_TIMEOUT_MS",
                VALIDATE_TIMEOUT_MS,
            )),
            csv_min_consistency: env_or("WARDEN_CSV_MIN_CONSISTENCY", CSV_MIN_CONSISTENCY),
            csv_sample_lines: env_or("WARDEN_CSV_SAMPLE_LINES", CSV_SAMPLE_LINES),
            max_image_pixels: env_or("WARDEN_MAX_IMAGE_PIXELS", MAX_IMAGE_PIXELS),
        };

        let detectors = env_list("WARDEN_DETECTORS", "clamd")
            .iter()
            .map(|s| s.parse::<DetectorKind>())
            .collect::<Result<Vec<_>, _>>()?;

        let scan = ScanSettings {
            scanning_disabled: env_bool("WARDEN_SCANNING_DISABLED", false),
            detectors,
            clamd_host: env::var("CLAMAV_HOST").unwrap_or_else(|_| "localhost".to_string()),
            clamd_port: env::var("CLAMAV_PORT")
                .unwrap_or_else(|_| "3310".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CLAMAV_PORT must be a valid port number"))?,
            clamscan_path: env::var("WARDEN_CLAMSCAN_PATH")
                .unwrap_or_else(|_| "clamscan".to_string()),
            yara_path: env::var("WARDEN_YARA_PATH").unwrap_or_else(|_| "yara".to_string()),
            yara_rules: env::var("WARDEN_YARA_RULES").ok().map(PathBuf::from),
            binary_allowlist: env_list(
                "WARDEN_BINARY_ALLOWLIST",
                "/usr/bin/clamscan,/usr/bin/yara,/usr/local/bin/yara",
            )
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            scratch_dir: env::var("WARDEN_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("warden-scan")),
            copy_max_bytes: env_or("WARDEN_SCAN_COPY_MAX_BYTES", SCAN_COPY_MAX_BYTES),
            detector_timeout: Duration::from_millis(env_or(
                "WARDEN_DETECTOR_TIMEOUT_MS",
                DETECTOR_TIMEOUT_MS,
            )),
            max_attempts: env_or("WARDEN_SCAN_MAX_ATTEMPTS", SCAN_MAX_ATTEMPTS),
            backoff_base: Duration::from_millis(env_or("WARDEN_SCAN_BACKOFF_MS", SCAN_BACKOFF_MS)),
            backoff_max: Duration::from_millis(env_or(
                "WARDEN_SCAN_MAX_BACKOFF_MS",
                SCAN_MAX_BACKOFF_MS,
            )),
            circuit_threshold: env_or("WARDEN_CIRCUIT_THRESHOLD", CIRCUIT_THRESHOLD),
            circuit_decay: Duration::from_secs(env_or(
                "WARDEN_CIRCUIT_DECAY_SECS",
                CIRCUIT_DECAY_SECS,
            )),
        };

        let cleanup = CleanupSettings {
            lock_timeout: Duration::from_millis(env_or(
                "WARDEN_CLEANUP_LOCK_TIMEOUT_MS",
                CLEANUP_LOCK_TIMEOUT_MS,
            )),
            max_age: chrono::Duration::hours(env_or(
                "WARDEN_CLEANUP_MAX_AGE_HOURS",
                CLEANUP_MAX_AGE_HOURS,
            )),
            sweep_interval: Duration::from_secs(env_or(
                "WARDEN_CLEANUP_SWEEP_INTERVAL_SECS",
                CLEANUP_SWEEP_INTERVAL_SECS,
            )),
        };

        let config = WardenConfig {
            base,
            storage,
            validation,
            scan,
            cleanup,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        matches!(
            self.base.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.validation.header_window_bytes < MIN_HEADER_WINDOW_BYTES {
            return Err(anyhow::anyhow!(
                "WARDEN_HEADER_WINDOW_BYTES must be at least {}",
                MIN_HEADER_WINDOW_BYTES
            ));
        }
        if self.validation.hard_max_bytes == 0 {
            return Err(anyhow::anyhow!("WARDEN_HARD_MAX_BYTES must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.validation.csv_min_consistency) {
            return Err(anyhow::anyhow!(
                "WARDEN_CSV_MIN_CONSISTENCY must be between 0.0 and 1.0"
            ));
        }
        if self.validation.csv_sample_lines == 0 {
            return Err(anyhow::anyhow!("WARDEN_CSV_SAMPLE_LINES must be greater than 0"));
        }
        if self.scan.max_attempts == 0 {
            return Err(anyhow::anyhow!("WARDEN_SCAN_MAX_ATTEMPTS must be at least 1"));
        }
        if self.scan.circuit_threshold == 0 {
            return Err(anyhow::anyhow!("WARDEN_CIRCUIT_THRESHOLD must be at least 1"));
        }
        if self.scan.detector_timeout.is_zero() || self.validation.validate_timeout.is_zero() {
            return Err(anyhow::anyhow!("Timeouts must be greater than 0"));
        }
        if self.scan.detectors.contains(&DetectorKind::Yara) && self.scan.yara_rules.is_none() {
            return Err(anyhow::anyhow!(
                "WARDEN_YARA_RULES must be set when the yara detector is enabled"
            ));
        }
        if self.is_production() && self.scan.scanning_disabled {
            tracing::warn!("Scanning is globally disabled in production");
        }
        if self.storage.quarantine_dir.starts_with(&self.storage.root) {
            return Err(anyhow::anyhow!(
                "WARDEN_QUARANTINE_DIR must not live inside WARDEN_STORAGE_ROOT"
            ));
        }
        Ok(())
    }
}

impl Default for WardenConfig {
    /// Development defaults, identical to `from_env` with an empty environment.
    fn default() -> Self {
        Self {
            base: BaseConfig {
                environment: "development".to_string(),
                log_format: LogFormat::Pretty,
                database_url: None,
            },
            storage: StorageSettings {
                root: PathBuf::from("./var/storage"),
                disk: "local".to_string(),
                quarantine_dir: PathBuf::from("./var/quarantine"),
                profiles_path: None,
            },
            validation: ValidationSettings {
                hard_max_bytes: DEFAULT_HARD_MAX_BYTES,
                header_window_bytes: DEFAULT_HEADER_WINDOW_BYTES,
                allow_mime_mismatch: false,
                validate_timeout: Duration::from_millis(VALIDATE_TIMEOUT_MS),
                csv_min_consistency: CSV_MIN_CONSISTENCY,
                csv_sample_lines: CSV_SAMPLE_LINES,
                max_image_pixels: MAX_IMAGE_PIXELS,
            },
            scan: ScanSettings {
                scanning_disabled: false,
                detectors: vec![DetectorKind::Clamd],
                clamd_host: "localhost".to_string(),
                clamd_port: 3310,
                clamscan_path: "clamscan".to_string(),
                yara_path: "yara".to_string(),
                yara_rules: None,
                binary_allowlist: vec![
                    PathBuf::from("/usr/bin/clamscan"),
                    PathBuf::from("/usr/bin/yara"),
                    PathBuf::from("/usr/local/bin/yara"),
                ],
                scratch_dir: env::temp_dir().join("warden-scan"),
                copy_max_bytes: SCAN_COPY_MAX_BYTES,
                detector_timeout: Duration::from_millis(DETECTOR_TIMEOUT_MS),
                max_attempts: SCAN_MAX_ATTEMPTS,
                backoff_base: Duration::from_millis(SCAN_BACKOFF_MS),
                backoff_max: Duration::from_millis(SCAN_MAX_BACKOFF_MS),
                circuit_threshold: CIRCUIT_THRESHOLD,
                circuit_decay: Duration::from_secs(CIRCUIT_DECAY_SECS),
            },
            cleanup: CleanupSettings {
                lock_timeout: Duration::from_millis(CLEANUP_LOCK_TIMEOUT_MS),
                max_age: chrono::Duration::hours(CLEANUP_MAX_AGE_HOURS),
                sweep_interval: Duration::from_secs(CLEANUP_SWEEP_INTERVAL_SECS),
            },
        }
    }
}
