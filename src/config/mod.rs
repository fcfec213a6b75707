//! Configuration management.
//!
//! Precedence, lowest first: built-in defaults, the TOML config file,
//! `MOODSCAN_*` environment variables, CLI flags (applied by the binary).

mod env;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use env::{parse_bool_env, parse_string_env};

/// Default bound on how long a request waits for its classification.
pub const DEFAULT_DETECTION_TIMEOUT_SECS: u64 = 60;

/// Default upload size limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Main configuration for moodscan.
#[derive(Debug, Clone, Default)]
pub struct MoodscanConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Detection pipeline settings.
    pub detection: DetectionConfig,
    /// External classifier settings.
    pub classifier: ClassifierConfig,
    /// Upload artifact settings.
    pub artifacts: ArtifactConfig,
    /// Logging and metrics settings, resolved by `observability`.
    pub observability: ObservabilitySettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum accepted request body size in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Detection pipeline settings.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// How long a request waits for its classification.
    pub timeout: Duration,
    /// Offload worker count. Anything other than 1 lets classifications
    /// overlap.
    pub workers: usize,
    /// Face detector backend passed to the classifier.
    pub detector_backend: String,
    /// Whether the classifier must find a face.
    pub enforce_detection: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_DETECTION_TIMEOUT_SECS),
            workers: crate::executor::DEFAULT_WORKERS,
            detector_backend: "opencv".to_string(),
            enforce_detection: false,
        }
    }
}

/// External classifier settings.
#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    /// Program to run; `None` leaves the classifier unconfigured.
    pub command: Option<String>,
    /// Arguments placed before the image path.
    pub args: Vec<String>,
}

/// Upload artifact settings.
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    /// Directory for artifacts; system temp dir when `None`.
    pub dir: Option<PathBuf>,
    /// File name prefix.
    pub prefix: String,
    /// File name suffix.
    pub suffix: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: None,
            prefix: "moodscan-".to_string(),
            suffix: ".jpg".to_string(),
        }
    }
}

/// Observability section, kept in file form and resolved at init.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// Logging section in config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `EnvFilter` directive, e.g. `info,moodscan=debug`.
    pub filter: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<String>,
}

/// Metrics section in config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Prometheus listener port.
    pub port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Server section.
    pub server: Option<ConfigFileServer>,
    /// Detection section.
    pub detection: Option<ConfigFileDetection>,
    /// Classifier section.
    pub classifier: Option<ConfigFileClassifier>,
    /// Artifacts section.
    pub artifacts: Option<ConfigFileArtifacts>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Metrics section.
    pub metrics: Option<MetricsSettings>,
}

/// Server section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileServer {
    /// Bind host.
    pub host: Option<String>,
    /// Bind port.
    pub port: Option<u16>,
    /// Upload size limit.
    pub max_upload_bytes: Option<usize>,
}

/// Detection section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDetection {
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Worker count.
    pub workers: Option<usize>,
    /// Detector backend.
    pub detector_backend: Option<String>,
    /// Enforce face detection.
    pub enforce_detection: Option<bool>,
}

/// Classifier section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileClassifier {
    /// Program to run.
    pub command: Option<String>,
    /// Leading arguments.
    pub args: Option<Vec<String>>,
}

/// Artifacts section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileArtifacts {
    /// Artifact directory.
    pub dir: Option<String>,
    /// File name prefix.
    pub prefix: Option<String>,
    /// File name suffix.
    pub suffix: Option<String>,
}

impl MoodscanConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::parse_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn parse_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/moodscan/` on macOS)
    /// 2. XDG config dir (`~/.config/moodscan/`)
    ///
    /// Returns default configuration if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("moodscan").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("moodscan")
                .join("config.toml"),
        ];

        for path in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Ignoring config file"),
            }
        }

        Self::default()
    }

    /// Loads from an explicit path, or the default location when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        path.map_or_else(|| Ok(Self::load_default()), Self::load_from_file)
    }

    /// Converts a `ConfigFile` to `MoodscanConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(server) = file.server {
            if let Some(host) = server.host {
                config.server.host = host;
            }
            if let Some(port) = server.port {
                config.server.port = port;
            }
            if let Some(max) = server.max_upload_bytes {
                config.server.max_upload_bytes = max;
            }
        }
        if let Some(detection) = file.detection {
            if let Some(secs) = detection.timeout_secs {
                config.detection.timeout = Duration::from_secs(secs);
            }
            if let Some(workers) = detection.workers {
                config.detection.workers = workers.max(1);
            }
            if let Some(backend) = detection.detector_backend {
                config.detection.detector_backend = backend;
            }
            if let Some(enforce) = detection.enforce_detection {
                config.detection.enforce_detection = enforce;
            }
        }
        if let Some(classifier) = file.classifier {
            config.classifier.command = classifier.command.filter(|c| !c.trim().is_empty());
            config.classifier.args = classifier.args.unwrap_or_default();
        }
        if let Some(artifacts) = file.artifacts {
            config.artifacts.dir = artifacts.dir.map(PathBuf::from);
            if let Some(prefix) = artifacts.prefix {
                config.artifacts.prefix = prefix;
            }
            if let Some(suffix) = artifacts.suffix {
                config.artifacts.suffix = suffix;
            }
        }
        config.observability = ObservabilitySettings {
            logging: file.logging,
            metrics: file.metrics,
        };

        config
    }

    /// Applies `MOODSCAN_*` environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `MOODSCAN_HOST` | `server.host` |
    /// | `MOODSCAN_PORT` | `server.port` |
    /// | `MOODSCAN_MAX_UPLOAD_BYTES` | `server.max_upload_bytes` |
    /// | `MOODSCAN_DETECTION_TIMEOUT_SECS` | `detection.timeout` |
    /// | `MOODSCAN_DETECTION_WORKERS` | `detection.workers` |
    /// | `MOODSCAN_ENFORCE_DETECTION` | `detection.enforce_detection` |
    /// | `MOODSCAN_CLASSIFIER_COMMAND` | `classifier.command` |
    /// | `MOODSCAN_ARTIFACT_DIR` | `artifacts.dir` |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(host) = parse_string_env("MOODSCAN_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_string_env("MOODSCAN_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(max) =
            parse_string_env("MOODSCAN_MAX_UPLOAD_BYTES").and_then(|v| v.parse().ok())
        {
            self.server.max_upload_bytes = max;
        }
        if let Some(secs) =
            parse_string_env("MOODSCAN_DETECTION_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.detection.timeout = Duration::from_secs(secs);
        }
        if let Some(workers) =
            parse_string_env("MOODSCAN_DETECTION_WORKERS").and_then(|v| v.parse::<usize>().ok())
        {
            self.detection.workers = workers.max(1);
        }
        if let Some(enforce) = parse_bool_env("MOODSCAN_ENFORCE_DETECTION") {
            self.detection.enforce_detection = enforce;
        }
        if let Some(command) = parse_string_env("MOODSCAN_CLASSIFIER_COMMAND") {
            self.classifier.command = Some(command);
        }
        if let Some(dir) = parse_string_env("MOODSCAN_ARTIFACT_DIR") {
            self.artifacts.dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Sets the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.server.host = host.into();
        self
    }

    /// Sets the detection timeout.
    #[must_use]
    pub const fn with_detection_timeout(mut self, timeout: Duration) -> Self {
        self.detection.timeout = timeout;
        self
    }

    /// Sets the artifact directory.
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts.dir = Some(dir.into());
        self
    }
}
