//! Server configuration, read once from the environment at startup

use std::net::SocketAddr;
use std::time::Duration;

use agent_runner::EngineConfig;
use anyhow::{bail, Context};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_WORKER_URL: &str = "http://localhost:4000";
const DEV_JWT_SECRET: &str = "dev-jwt-secret-change-me";
const DEFAULT_TOOL_OUTPUT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_EXPIRY_SWEEP_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub worker_url: String,
    pub jwt_secret: String,
    /// Set when no secret was configured and the development secret is used
    pub jwt_secret_defaulted: bool,
    /// Hex SHA-256 digests of the accepted API keys
    pub api_key_digests: Vec<String>,
    pub auth_disabled: bool,
    pub tool_output_timeout: Duration,
    pub step_timeout: Option<Duration>,
    pub expiry_sweep_interval: Duration,
}

fn env_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

fn env_secs(name: &str, raw: Option<String>) -> anyhow::Result<Option<u64>> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            let secs = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number of seconds", name))?;
            Ok(Some(secs))
        }
        _ => Ok(None),
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("ASST_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("ASST_BIND_ADDR must be a socket address such as 0.0.0.0:8081")?;

        let worker_url = lookup("AGENT_WORKER_URL").unwrap_or_else(|| DEFAULT_WORKER_URL.to_string());

        let (jwt_secret, jwt_secret_defaulted) = match lookup("ASST_JWT_SECRET") {
            Some(secret) if !secret.is_empty() => (secret, false),
            _ => (DEV_JWT_SECRET.to_string(), true),
        };

        let api_key_digests = lookup("ASST_API_KEY_SHA256")
            .map(|raw| {
                raw.split(',')
                    .map(|digest| digest.trim().to_ascii_lowercase())
                    .filter(|digest| !digest.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let tool_output_timeout = env_secs(
            "ASST_TOOL_OUTPUT_TIMEOUT_SECS",
            lookup("ASST_TOOL_OUTPUT_TIMEOUT_SECS"),
        )?
        .unwrap_or(DEFAULT_TOOL_OUTPUT_TIMEOUT_SECS);

        let step_timeout = env_secs("ASST_STEP_TIMEOUT_SECS", lookup("ASST_STEP_TIMEOUT_SECS"))?;

        let expiry_sweep = env_secs("ASST_EXPIRY_SWEEP_SECS", lookup("ASST_EXPIRY_SWEEP_SECS"))?
            .unwrap_or(DEFAULT_EXPIRY_SWEEP_SECS);
        if expiry_sweep == 0 {
            bail!("ASST_EXPIRY_SWEEP_SECS must be at least 1");
        }

        Ok(Self {
            bind_addr,
            worker_url,
            jwt_secret,
            jwt_secret_defaulted,
            api_key_digests,
            auth_disabled: env_flag(lookup("ASST_AUTH_DISABLED"), false),
            tool_output_timeout: Duration::from_secs(tool_output_timeout),
            step_timeout: step_timeout.map(Duration::from_secs),
            expiry_sweep_interval: Duration::from_secs(expiry_sweep),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tool_output_timeout: self.tool_output_timeout,
            step_timeout: self.step_timeout,
            ..EngineConfig::default()
        }
    }
}
