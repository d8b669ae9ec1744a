//! Layered application configuration and startup secrets.
//!
//! Priority (highest first): CLI flag, CLI env var, `POSTOP_` prefixed env
//! vars, YAML config file, built-in defaults. Secrets are read separately
//! from the environment and are mandatory.

use ::config::{Config, Environment, File, FileFormat};
use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{LlmProtocol, LlmSettings, Provider};

/// Environment variable holding the LLM provider API key.
pub const LLM_API_KEY_VAR: &str = "OPENAI_API_KEY";
/// Environment variable holding the run-tracing API key.
pub const TRACING_API_KEY_VAR: &str = "LANGCHAIN_API_KEY";

/// Fallback config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Errors raised while loading configuration. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required secret is absent or blank.
    #[error("missing required secret: {0}")]
    MissingSecret(&'static str),

    /// A setting has an unusable value.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// The layered sources could not be read or deserialized.
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),

    /// Command line parsing failed (also used for `--help`/`--version`).
    #[error(transparent)]
    Cli(#[from] clap::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Model identifier
    #[arg(long, env = "LLM_MODEL")]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "LLM_BASE_URL")]
    pub base_url: Option<String>,

    /// Disable reporting runs to the tracing service
    #[arg(long)]
    pub no_run_tracing: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub tracing: RunTracingConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub protocol: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub include_history: bool,
    #[serde(default)]
    pub azure_deployment: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
}

/// Remote run-tracing service settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RunTracingConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub project: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

/// Static page content.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UiConfig {
    pub title: String,
    pub input_placeholder: String,
    pub info_heading: String,
    pub warning: String,
    pub info_panel: Vec<String>,
    pub footer: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            title: "Post-Op Care Assistant".to_string(),
            input_placeholder: "Type your question here...".to_string(),
            info_heading: "Important Information".to_string(),
            warning: "For Emergencies Call 911".to_string(),
            info_panel: Vec::new(),
            footer: "This is an AI assistant. For medical emergencies, please call 911 or contact the clinic directly.".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("llm.base_url", "https://api.openai.com")?
            .set_default("llm.model", "gpt-4")?
            .set_default("llm.temperature", 0.3)?
            .set_default("llm.protocol", "auto")?
            .set_default("llm.include_history", true)?
            .set_default("tracing.enabled", true)?
            .set_default("tracing.endpoint", "https://api.smith.langchain.com")?
            .set_default("tracing.project", "default")?
            .set_default("session.idle_timeout_secs", 30 * 60)?
            .set_default("session.sweep_interval_secs", 60)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(
                File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false),
            ),
        };

        // E.g. POSTOP_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("POSTOP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("llm.model", model)?;
        }
        if let Some(base_url) = cli.base_url {
            builder = builder.set_override("llm.base_url", base_url)?;
        }
        if cli.no_run_tracing {
            builder = builder.set_override("tracing.enabled", false)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        parse_http_url("llm.base_url", &self.llm.base_url)?;
        if self.tracing.enabled {
            parse_http_url("tracing.endpoint", &self.tracing.endpoint)?;
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "llm.model",
                reason: "cannot be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid {
                key: "llm.temperature",
                reason: format!("{} is outside 0.0..=2.0", self.llm.temperature),
            });
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "session.sweep_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Connection settings for the response generator.
    #[must_use]
    pub fn llm_settings(&self, secrets: &Secrets) -> LlmSettings {
        let provider = Provider::detect_from_url(&self.llm.base_url).with_azure_deployment(
            self.llm.azure_deployment.clone(),
            self.llm.azure_api_version.clone(),
        );

        LlmSettings {
            base_url: self.llm.base_url.clone(),
            api_key: secrets.llm_api_key.clone(),
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            protocol: LlmProtocol::parse(&self.llm.protocol),
            provider,
            system_prompt: self.llm.system_prompt.clone(),
        }
    }
}

fn parse_http_url(key: &'static str, value: &str) -> Result<url::Url, ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("`{value}` is not a URL: {e}"),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }
    Ok(parsed)
}

/// API keys that must be supplied at process start.
#[derive(Clone)]
pub struct Secrets {
    pub llm_api_key: String,
    pub tracing_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("llm_api_key", &"<redacted>")
            .field("tracing_api_key", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    /// Read both secrets from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read both secrets through `lookup`, failing on the first one that is
    /// absent or blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingSecret(name))
        };

        Ok(Self {
            llm_api_key: require(LLM_API_KEY_VAR)?,
            tracing_api_key: require(TRACING_API_KEY_VAR)?,
        })
    }
}
