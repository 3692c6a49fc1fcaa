//! Profile resolution: `KONGCTL_PROFILE` selects a profile name (default
//! `"default"`), then every setting is read from `KONGCTL_<PROFILE>_<PATH>`
//! (`spec.md` §6, e.g. `KONGCTL_DEFAULT_BASE_URL`).

use std::env;
use std::time::Duration;

use kongctl_remote::ClientConfig;

const DEFAULT_PROFILE: &str = "default";

/// Resolved connection settings for one profile, ready to hand to
/// [`kongctl_remote::RemoteClient::new`].
#[derive(Debug, Clone)]
pub struct Config {
    pub profile: String,
    pub base_url: String,
    pub bearer_token: String,
    pub request_timeout: Duration,
    pub object_fetch_concurrency: usize,
}

impl Config {
    /// Resolves a [`Config`] entirely from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        let profile = env::var("KONGCTL_PROFILE").unwrap_or_else(|_| DEFAULT_PROFILE.to_string());
        Self::from_env_profile(&profile)
    }

    fn from_env_profile(profile: &str) -> Result<Self, Error> {
        let prefix = format!("KONGCTL_{}_", profile.to_uppercase());

        let base_url = read_required(&prefix, "BASE_URL")?;
        let bearer_token = read_required(&prefix, "TOKEN")?;
        let request_timeout = read_optional(&prefix, "TIMEOUT_SECS")?
            .map(|v| parse_u64(&prefix, "TIMEOUT_SECS", &v))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        let object_fetch_concurrency = read_optional(&prefix, "CONCURRENCY")?
            .map(|v| parse_u64(&prefix, "CONCURRENCY", &v))
            .transpose()?
            .map(|v| v as usize)
            .unwrap_or(8);

        Ok(Self {
            profile: profile.to_string(),
            base_url,
            bearer_token,
            request_timeout,
            object_fetch_concurrency,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            bearer_token: self.bearer_token.clone(),
            request_timeout: self.request_timeout,
            object_fetch_concurrency: self.object_fetch_concurrency,
        }
    }
}

fn read_required(prefix: &str, suffix: &str) -> Result<String, Error> {
    let key = format!("{prefix}{suffix}");
    env::var(&key).map_err(|_| Error::MissingVar(key))
}

fn read_optional(prefix: &str, suffix: &str) -> Result<Option<String>, Error> {
    match env::var(format!("{prefix}{suffix}")) {
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(Error::InvalidVar(format!("{prefix}{suffix}"))),
    }
}

fn parse_u64(prefix: &str, suffix: &str, value: &str) -> Result<u64, Error> {
    value.parse().map_err(|_| Error::InvalidVar(format!("{prefix}{suffix}")))
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing required environment variable {0}")]
    MissingVar(String),

    #[error("environment variable {0} has an invalid value")]
    InvalidVar(String),
}
