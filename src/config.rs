use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_STAGING_DIR: &str = "uploads";
const DEFAULT_OUTPUT_PATH: &str = "output.json";
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the extraction server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Root directory used to stage uploads while they are processed.
    pub staging_dir: PathBuf,
    /// Location of the JSON output artifact.
    pub output_path: PathBuf,
    /// Origins permitted by the CORS layer.
    pub allowed_origins: Vec<String>,
    /// Upper bound on the size of a `POST /process` request body.
    pub max_upload_bytes: usize,
    /// Pause applied by the cleanup worker before wiping the artifact.
    pub wipe_delay_ms: u64,
    /// AI backend used to turn extracted text into records.
    pub structurer_provider: StructurerProvider,
    /// Model identifier passed to the structuring provider.
    pub structurer_model: String,
    /// Optional system prompt replacing the built-in structuring instructions.
    pub structurer_prompt: Option<String>,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Base URL of the OpenAI-compatible API.
    pub openai_base_url: String,
    /// API key for the OpenAI-compatible API.
    pub openai_api_key: Option<String>,
}

/// Supported structuring backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructurerProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI (or compatible) chat completions API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let structurer_provider: StructurerProvider =
            load_env("STRUCTURER_PROVIDER")?.parse().map_err(|()| {
                ConfigError::InvalidValue("STRUCTURER_PROVIDER".to_string())
            })?;
        let openai_api_key = load_env_optional("OPENAI_API_KEY");
        if structurer_provider == StructurerProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }

        Ok(Self {
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            staging_dir: load_env_optional("STAGING_DIR")
                .unwrap_or_else(|| DEFAULT_STAGING_DIR.to_string())
                .into(),
            output_path: load_env_optional("OUTPUT_PATH")
                .unwrap_or_else(|| DEFAULT_OUTPUT_PATH.to_string())
                .into(),
            allowed_origins: load_env_optional("ALLOWED_ORIGINS")
                .map(|value| parse_origins(&value))
                .transpose()?
                .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]),
            max_upload_bytes: load_env_optional("MAX_UPLOAD_BYTES")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("MAX_UPLOAD_BYTES".into()))
                })
                .transpose()?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            wipe_delay_ms: load_env_optional("WIPE_DELAY_MS")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("WIPE_DELAY_MS".into()))
                })
                .transpose()?
                .unwrap_or(0),
            structurer_provider,
            structurer_model: load_env("STRUCTURER_MODEL")?,
            structurer_prompt: load_env_optional("STRUCTURER_PROMPT"),
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_api_key,
        })
    }

    /// Delay the cleanup worker waits before wiping the artifact.
    pub fn wipe_delay(&self) -> Duration {
        Duration::from_millis(self.wipe_delay_ms)
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Credentialed CORS cannot use a wildcard origin, so `*` is rejected outright.
fn parse_origins(value: &str) -> Result<Vec<String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| match origin {
            "*" => Err(ConfigError::InvalidValue("ALLOWED_ORIGINS".into())),
            _ => Ok(origin.trim_end_matches('/').to_string()),
        })
        .collect()
}

impl std::str::FromStr for StructurerProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the process-wide cache.
///
/// A second call returns the configuration installed by the first.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        staging_dir = %config.staging_dir.display(),
        output_path = %config.output_path.display(),
        server_port = ?config.server_port,
        structurer_provider = ?config.structurer_provider,
        structurer_model = %config.structurer_model,
        origins = config.allowed_origins.len(),
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
