//! Configuration management for the math agent.
//!
//! Configuration is read once from environment variables, after an optional
//! `.env` file has been loaded into the process environment:
//! - `GROQ_API_KEY` - Required. Credential for the completion service (`groq_key` is accepted as a fallback).
//! - `DEFAULT_MODEL` - Optional. Model identifier. Defaults to `llama3-8b-8192`.
//! - `LLM_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to the Groq endpoint.
//! - `MATH_TOOL_COMMAND` - Optional. Command that starts the MCP math server. Defaults to `uv`.
//! - `MATH_TOOL_ARGS` - Optional. Whitespace-separated arguments. Defaults to `run main.py`.
//! - `MAX_ITERATIONS` - Optional. Maximum model round-trips per query. Defaults to `10`.
//! - `LLM_TIMEOUT_SECS` - Optional. Completion request timeout. Defaults to `60`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Tool response timeout. Defaults to `30`.
//! - `POLICY_VERSION` - Optional. `v1` or `v2`. Defaults to `v2`.
//! - `LOGFIRE_TOKEN` - Optional. Credential for the observability endpoint.
//! - `OBSERVABILITY_ENDPOINT` - Optional. URL that receives query events as JSON.
//! - `APP_ENV` - Optional. Environment label attached to events. Defaults to `development`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::agent::PolicyVersion;

/// Groq's OpenAI-compatible API.
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to load .env file: {0}")]
    EnvFile(String),
}

/// Load `.env` from the working directory or one of its parents. Its values
/// override variables that are already set. A missing file is not an error.
pub fn load_dotenv() -> Result<Option<PathBuf>, ConfigError> {
    env_file_result(dotenvy::dotenv_override())
}

/// Load an explicit env file, with the same rules as [`load_dotenv`].
pub fn load_dotenv_from(path: &Path) -> Result<Option<PathBuf>, ConfigError> {
    env_file_result(dotenvy::from_path_override(path).map(|()| path.to_path_buf()))
}

fn env_file_result(
    result: Result<PathBuf, dotenvy::Error>,
) -> Result<Option<PathBuf>, ConfigError> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(ConfigError::EnvFile(e.to_string())),
    }
}

/// How to start the MCP math tool process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerConfig {
    /// Executable to spawn
    pub command: String,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// How long to wait for any single response from the tool process
    pub timeout: Duration,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            command: "uv".to_string(),
            args: vec!["run".to_string(), "main.py".to_string()],
            timeout: Duration::from_secs(30),
        }
    }
}

/// Where query events go besides the local log.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Bearer token for the remote sink
    pub token: Option<String>,

    /// Remote sink URL
    pub endpoint: Option<String>,

    /// Environment label (e.g. `development`, `production`)
    pub environment: String,
}

impl TelemetryConfig {
    /// Remote export is on only when both endpoint and token are set.
    pub fn remote_enabled(&self) -> bool {
        self.endpoint.is_some() && self.token.is_some()
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion service API key
    pub api_key: String,

    /// Model identifier
    pub default_model: String,

    /// Base URL of the OpenAI-compatible completion API
    pub llm_base_url: String,

    /// Timeout for one completion request
    pub llm_timeout: Duration,

    /// Maximum model round-trips per query
    pub max_iterations: usize,

    /// Wording of the policy contract
    pub policy_version: PolicyVersion,

    /// Tool process launch settings
    pub tool_server: ToolServerConfig,

    /// Event export settings
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if neither `GROQ_API_KEY` nor `groq_key` is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GROQ_API_KEY")
            .or_else(|| lookup("groq_key"))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GROQ_API_KEY".to_string()))?;

        let default_model = lookup("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let llm_base_url = lookup("LLM_BASE_URL")
            .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let max_iterations = parse_or(&lookup, "MAX_ITERATIONS", 10usize)?;
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let llm_timeout = Duration::from_secs(parse_or(&lookup, "LLM_TIMEOUT_SECS", 60u64)?);

        let policy_version = lookup("POLICY_VERSION")
            .map(|v| {
                v.parse::<PolicyVersion>()
                    .map_err(|e| ConfigError::InvalidValue("POLICY_VERSION".to_string(), e))
            })
            .transpose()?
            .unwrap_or_default();

        let mut tool_server = ToolServerConfig {
            timeout: Duration::from_secs(parse_or(&lookup, "TOOL_TIMEOUT_SECS", 30u64)?),
            ..ToolServerConfig::default()
        };
        if let Some(command) = lookup("MATH_TOOL_COMMAND") {
            if command.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "MATH_TOOL_COMMAND".to_string(),
                    "must not be empty".to_string(),
                ));
            }
            tool_server.command = command.trim().to_string();
        }
        if let Some(args) = lookup("MATH_TOOL_ARGS") {
            tool_server.args = args.split_whitespace().map(str::to_string).collect();
        }

        let telemetry = TelemetryConfig {
            token: lookup("LOGFIRE_TOKEN").filter(|v| !v.is_empty()),
            endpoint: lookup("OBSERVABILITY_ENDPOINT").filter(|v| !v.is_empty()),
            environment: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
        };

        Ok(Self {
            api_key,
            default_model,
            llm_base_url,
            llm_timeout,
            max_iterations,
            policy_version,
            tool_server,
            telemetry,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            llm_timeout: Duration::from_secs(60),
            max_iterations: 10,
            policy_version: PolicyVersion::default(),
            tool_server: ToolServerConfig::default(),
            telemetry: TelemetryConfig {
                environment: "development".to_string(),
                ..TelemetryConfig::default()
            },
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_only_api_key() {
        let config = Config::from_lookup(lookup_from(&[("GROQ_API_KEY", "gsk-test")])).unwrap();
        assert_eq!(config.api_key, "gsk-test");
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.llm_base_url, DEFAULT_LLM_BASE_URL);
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.policy_version, PolicyVersion::V2);
        assert_eq!(config.tool_server, ToolServerConfig::default());
        assert!(!config.telemetry.remote_enabled());
        assert_eq!(config.telemetry.environment, "development");
    }

    #[test]
    fn legacy_key_name_is_accepted() {
        let config = Config::from_lookup(lookup_from(&[("groq_key", "legacy")])).unwrap();
        assert_eq!(config.api_key, "legacy");
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref name) if name == "GROQ_API_KEY"));
    }

    #[test]
    fn tool_command_and_args_are_split() {
        let config = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("MATH_TOOL_COMMAND", "python3"),
            ("MATH_TOOL_ARGS", "  -m   math_server "),
            ("TOOL_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.tool_server.command, "python3");
        assert_eq!(config.tool_server.args, vec!["-m", "math_server"]);
        assert_eq!(config.tool_server.timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("MAX_ITERATIONS", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "MAX_ITERATIONS"));

        let err = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("MAX_ITERATIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(..)));
    }

    #[test]
    fn policy_version_and_telemetry() {
        let config = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("POLICY_VERSION", "V1"),
            ("LOGFIRE_TOKEN", "tok"),
            ("OBSERVABILITY_ENDPOINT", "http://127.0.0.1:4318/events"),
            ("APP_ENV", "production"),
            ("LLM_BASE_URL", "http://localhost:8080/v1/"),
        ]))
        .unwrap();
        assert_eq!(config.policy_version, PolicyVersion::V1);
        assert!(config.telemetry.remote_enabled());
        assert_eq!(config.telemetry.environment, "production");
        assert_eq!(config.llm_base_url, "http://localhost:8080/v1");

        let err = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("POLICY_VERSION", "v3"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "POLICY_VERSION"));
    }

    #[test]
    fn env_file_overrides_process_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# local secrets\nMATH_AGENT_ENV_FILE_TEST=from-file\n").unwrap();
        std::env::set_var("MATH_AGENT_ENV_FILE_TEST", "from-process");

        let loaded = load_dotenv_from(&path).unwrap();

        assert_eq!(loaded.as_deref(), Some(path.as_path()));
        assert_eq!(
            std::env::var("MATH_AGENT_ENV_FILE_TEST").as_deref(),
            Ok("from-file")
        );
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_dotenv_from(&dir.path().join(".env")).unwrap();
        assert!(loaded.is_none());
    }
}
