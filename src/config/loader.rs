//! Configuration Loader
//!
//! Merges configuration sources with the `config` crate, lowest precedence
//! first:
//!
//! 1. Built-in defaults ([`ResilienceConfig::default`])
//! 2. Optional file named by `RESILIENCE_CONFIG_PATH` (format by extension)
//! 3. Legacy flat variables: `REDIS_URL`, `CACHE_KEY_PREFIX`,
//!    `CACHE_DEFAULT_TTL`, `CACHE_WARMUP_ENABLED`
//! 4. Prefixed variables such as `RESILIENCE__CACHE__KEY_PREFIX`
//!
//! A legacy variable is ignored when its prefixed counterpart is also set.

use super::error::{ConfigResult, ConfigurationError};
use super::ResilienceConfig;
use ::config::{Config, ConfigBuilder, Environment, File};
use ::config::builder::DefaultState;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "RESILIENCE_CONFIG_PATH";

/// Prefix for structured environment overrides
pub const ENV_PREFIX: &str = "RESILIENCE";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Legacy variable, config key, and the prefixed variable that supersedes it
const LEGACY_VARIABLES: &[(&str, &str, &str, LegacyKind)] = &[
    ("REDIS_URL", "redis.url", "RESILIENCE__REDIS__URL", LegacyKind::Text),
    (
        "CACHE_KEY_PREFIX",
        "cache.key_prefix",
        "RESILIENCE__CACHE__KEY_PREFIX",
        LegacyKind::Text,
    ),
    (
        "CACHE_DEFAULT_TTL",
        "cache.default_ttl_seconds",
        "RESILIENCE__CACHE__DEFAULT_TTL_SECONDS",
        LegacyKind::Seconds,
    ),
    (
        "CACHE_WARMUP_ENABLED",
        "warmup.enabled",
        "RESILIENCE__WARMUP__ENABLED",
        LegacyKind::Flag,
    ),
];

#[derive(Debug, Clone, Copy)]
enum LegacyKind {
    Text,
    Seconds,
    Flag,
}

impl ResilienceConfig {
    /// Load configuration from the process environment
    pub fn load() -> ConfigResult<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref(), None)
    }

    /// Load configuration from an explicit file and variable set
    ///
    /// `env` of `None` reads the process environment; tests pass a map so they
    /// never touch global state.
    pub fn load_from(file: Option<&Path>, env: Option<HashMap<String, String>>) -> ConfigResult<Self> {
        let vars: HashMap<String, String> = env.unwrap_or_else(|| std::env::vars().collect());

        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = file {
            if !path.is_file() {
                return Err(ConfigurationError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path));
        }

        builder = apply_legacy_variables(builder, &vars)?;

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(Some(vars)),
        );

        let config: ResilienceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            cache_prefix = %config.cache.key_prefix,
            default_ttl_seconds = config.cache.default_ttl_seconds,
            warmup_enabled = config.warmup.enabled,
            "Configuration loaded successfully"
        );

        Ok(config)
    }
}

fn apply_legacy_variables(
    mut builder: ConfigBuilder<DefaultState>,
    vars: &HashMap<String, String>,
) -> ConfigResult<ConfigBuilder<DefaultState>> {
    for (variable, key, superseded_by, kind) in LEGACY_VARIABLES {
        if vars.contains_key(*superseded_by) {
            continue;
        }
        let Some(raw) = vars.get(*variable) else {
            continue;
        };

        builder = match kind {
            LegacyKind::Text => builder.set_override(*key, raw.clone())?,
            LegacyKind::Seconds => {
                let seconds: u64 = raw.trim().parse().map_err(|_| {
                    ConfigurationError::invalid_value(
                        *variable,
                        raw.clone(),
                        "expected a whole number of seconds",
                    )
                })?;
                builder.set_override(*key, seconds)?
            }
            LegacyKind::Flag => builder.set_override(*key, parse_flag(variable, raw)?)?,
        };
    }
    Ok(builder)
}

fn parse_flag(variable: &str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigurationError::invalid_value(
            variable,
            raw,
            "expected true or false",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = ResilienceConfig::load_from(None, Some(HashMap::new())).unwrap();
        assert_eq!(config, ResilienceConfig::default());
    }

    #[test]
    fn test_legacy_variables() {
        let config = ResilienceConfig::load_from(
            None,
            Some(vars(&[
                ("REDIS_URL", "redis://cache.internal:6380"),
                ("CACHE_KEY_PREFIX", "shop"),
                ("CACHE_DEFAULT_TTL", "600"),
                ("CACHE_WARMUP_ENABLED", "false"),
            ])),
        )
        .unwrap();

        assert_eq!(config.redis.url, "redis://cache.internal:6380");
        assert_eq!(config.cache.key_prefix, "shop");
        assert_eq!(config.cache.default_ttl_seconds, 600);
        assert!(!config.warmup.enabled);
    }

    #[test]
    fn test_prefixed_variables_win_over_legacy() {
        let config = ResilienceConfig::load_from(
            None,
            Some(vars(&[
                ("CACHE_KEY_PREFIX", "legacy"),
                ("RESILIENCE__CACHE__KEY_PREFIX", "modern"),
                ("RESILIENCE__WARMUP__PARALLEL", "8"),
            ])),
        )
        .unwrap();

        assert_eq!(config.cache.key_prefix, "modern");
        assert_eq!(config.warmup.parallel, 8);
    }

    #[test]
    fn test_invalid_legacy_values_are_rejected() {
        let result =
            ResilienceConfig::load_from(None, Some(vars(&[("CACHE_DEFAULT_TTL", "soon")])));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));

        let result =
            ResilienceConfig::load_from(None, Some(vars(&[("CACHE_WARMUP_ENABLED", "maybe")])));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_ttl_fails_validation() {
        let result =
            ResilienceConfig::load_from(None, Some(vars(&[("CACHE_DEFAULT_TTL", "0")])));
        assert!(matches!(
            result,
            Err(ConfigurationError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ResilienceConfig::load_from(
            Some(Path::new("/definitely/not/here.toml")),
            Some(HashMap::new()),
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::FileNotFound { .. })
        ));
    }
}
