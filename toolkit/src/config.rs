//! Connection settings, loaded once per invocation.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const URL_VARS: &[&str] = &["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
pub const ANON_KEY_VARS: &[&str] = &["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"];
pub const SERVICE_ROLE_VAR: &str = "SUPABASE_SERVICE_ROLE_KEY";

const DEFAULT_EXEC_SQL_FUNCTION: &str = "exec_sql";
const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set (environment or .env file)")]
    Missing(String),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: String, reason: String },
}

#[derive(Clone)]
pub struct Config {
    pub url: String,
    pub anon_key: String,
    pub service_role_key: Option<String>,
    /// Send the service-role key instead of the anon key.
    pub use_service_role: bool,
    pub exec_sql_function: String,
    pub page_size: usize,
    pub timeout: Duration,
}

impl Config {
    /// Public (anon key) configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Server-only configuration. Refuses to initialize without the
    /// service-role key.
    pub fn server_from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::server_from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = first_set(&lookup, URL_VARS).ok_or_else(|| ConfigError::Missing(URL_VARS[0].to_string()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: URL_VARS[0].to_string(),
                reason: format!("'{}' is not an http(s) URL", url),
            });
        }
        let anon_key =
            first_set(&lookup, ANON_KEY_VARS).ok_or_else(|| ConfigError::Missing(ANON_KEY_VARS[0].to_string()))?;
        let service_role_key = first_set(&lookup, &[SERVICE_ROLE_VAR]);

        let exec_sql_function = first_set(&lookup, &["CMMS_EXEC_SQL_FUNCTION"])
            .unwrap_or_else(|| DEFAULT_EXEC_SQL_FUNCTION.to_string());
        let page_size = parse_var(&lookup, "CMMS_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                var: "CMMS_PAGE_SIZE".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let timeout_secs = parse_var(&lookup, "CMMS_HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            service_role_key,
            use_service_role: false,
            exec_sql_function,
            page_size,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn server_from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::from_lookup(lookup)?;
        if config.service_role_key.is_none() {
            return Err(ConfigError::Missing(SERVICE_ROLE_VAR.to_string()));
        }
        config.use_service_role = true;
        Ok(config)
    }

    /// Key sent as both `apikey` and bearer token.
    pub fn api_key(&self) -> &str {
        match (&self.service_role_key, self.use_service_role) {
            (Some(key), true) => key,
            _ => &self.anon_key,
        }
    }

    pub fn key_kind(&self) -> &'static str {
        if self.use_service_role {
            "service-role"
        } else {
            "anon"
        }
    }
}

/// First non-blank value among `vars`.
fn first_set<F>(lookup: &F, vars: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    vars.iter()
        .filter_map(|v| lookup(*v))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(var).map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("anon_key", &mask(&self.anon_key))
            .field("service_role_key", &self.service_role_key.as_deref().map(mask))
            .field("use_service_role", &self.use_service_role)
            .field("exec_sql_function", &self.exec_sql_function)
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}
