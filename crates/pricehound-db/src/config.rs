use std::time::Duration;

use pricehound_core::AppError;

/// Postgres connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a query waits for a free pooled connection.
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// `DATABASE_URL` is required. `DATABASE_MAX_CONNECTIONS` defaults to 5
    /// and `DATABASE_ACQUIRE_TIMEOUT_SECS` to 30.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError("DATABASE_URL must be set".into()))?;

        let max_connections = positive(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?;
        let acquire_timeout = positive(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS", 30)?;

        Ok(Self {
            url,
            max_connections: u32::try_from(max_connections).map_err(|_| {
                AppError::ConfigError("DATABASE_MAX_CONNECTIONS is too large".into())
            })?,
            acquire_timeout: Duration::from_secs(acquire_timeout),
        })
    }
}

fn positive<F>(lookup: &F, key: &str, default: u64) -> Result<u64, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(AppError::ConfigError(format!("{key} must be at least 1"))),
        Ok(value) => Ok(value),
        Err(_) => Err(AppError::ConfigError(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn url_is_required() {
        let err = DatabaseConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn defaults_apply() {
        let config =
            DatabaseConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://db/pricehound")]))
                .unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_connections_rejected() {
        let err = DatabaseConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/pricehound"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
