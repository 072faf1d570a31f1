use facereg_store::FirestoreConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `FACEREG_CONFIG`,
/// then `FACEREG_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address to bind (default: 0.0.0.0).
    pub host: String,
    /// TCP port (default: 5000, or `PORT`).
    pub port: u16,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Local record file used when Firestore is not available.
    pub data_file: PathBuf,
    /// Where the decoder writes its fallback temp files.
    pub temp_dir: PathBuf,
    /// Minimum cosine similarity for a positive match.
    pub match_threshold: f32,
    /// Images wider than this are downscaled before detection.
    pub max_detect_width: u32,
    /// Maximum accepted request body.
    pub max_body_bytes: usize,
    pub firestore: FirestoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirestoreSettings {
    /// Firestore is only tried when a project is set.
    pub project_id: Option<String>,
    pub database: String,
    pub collection: String,
    pub base_url: String,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model_dir: facereg_core::default_model_dir(),
            data_file: PathBuf::from("features.txt"),
            temp_dir: std::env::temp_dir(),
            match_threshold: facereg_core::DEFAULT_MATCH_THRESHOLD,
            max_detect_width: facereg_core::pipeline::DEFAULT_MAX_DETECT_WIDTH,
            max_body_bytes: 16 * 1024 * 1024,
            firestore: FirestoreSettings::default(),
        }
    }
}

impl Default for FirestoreSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            database: facereg_store::firestore::DEFAULT_DATABASE.to_string(),
            collection: facereg_store::firestore::DEFAULT_COLLECTION.to_string(),
            base_url: facereg_store::firestore::DEFAULT_BASE_URL.to_string(),
            token: None,
            token_file: None,
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from the optional config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();

        let mut config = match lookup("FACEREG_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(lookup);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlay environment variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEREG_HOST") {
            self.host = v;
        }
        self.port = env_parse(&lookup, "PORT", self.port);
        self.port = env_parse(&lookup, "FACEREG_PORT", self.port);
        if let Some(v) = lookup("FACEREG_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEREG_DATA_FILE") {
            self.data_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEREG_TEMP_DIR") {
            self.temp_dir = PathBuf::from(v);
        }
        self.match_threshold = env_parse(&lookup, "FACEREG_MATCH_THRESHOLD", self.match_threshold);
        self.max_detect_width = env_parse(&lookup, "FACEREG_MAX_DETECT_WIDTH", self.max_detect_width);
        self.max_body_bytes = env_parse(&lookup, "FACEREG_MAX_BODY_BYTES", self.max_body_bytes);

        let fs = &mut self.firestore;
        if let Some(v) = lookup("FACEREG_FIRESTORE_PROJECT") {
            fs.project_id = Some(v).filter(|p| !p.is_empty());
        }
        if let Some(v) = lookup("FACEREG_FIRESTORE_COLLECTION") {
            fs.collection = v;
        }
        if let Some(v) = lookup("FACEREG_FIRESTORE_URL") {
            fs.base_url = v;
        }
        if let Some(v) = lookup("FACEREG_FIRESTORE_TOKEN") {
            fs.token = Some(v);
        }
        if let Some(v) = lookup("FACEREG_FIRESTORE_TOKEN_FILE") {
            fs.token_file = Some(PathBuf::from(v));
        }
        fs.timeout_secs = env_parse(&lookup, "FACEREG_FIRESTORE_TIMEOUT_SECS", fs.timeout_secs);

        // Emulators listen on plain HTTP and ignore credentials.
        if let Some(host) = lookup("FIRESTORE_EMULATOR_HOST").filter(|h| !h.is_empty()) {
            fs.base_url = format!("http://{host}/v1");
            fs.token = None;
            fs.token_file = None;
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(facereg_core::SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(facereg_core::ARCFACE_MODEL_FILE)
    }

    /// Firestore connection settings, or `None` when no project is configured.
    pub fn firestore(&self) -> Result<Option<FirestoreConfig>, ConfigError> {
        let fs = &self.firestore;
        let Some(project_id) = fs.project_id.clone() else {
            return Ok(None);
        };

        let bearer_token = match (&fs.token, &fs.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => {
                let token = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Some(token.trim().to_string())
            }
            (None, None) => None,
        };

        Ok(Some(FirestoreConfig {
            project_id,
            database: fs.database.clone(),
            collection: fs.collection.clone(),
            base_url: fs.base_url.clone(),
            bearer_token,
            timeout: Duration::from_secs(fs.timeout_secs),
        }))
    }
}

/// Parse `key` if present and well-formed, otherwise keep `current`.
fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
                current
            }
        },
        None => current,
    }
}
