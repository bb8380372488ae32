//! Process-wide configuration for the auth and session core.
//!
//! # Responsibility
//! - Define the immutable [`Settings`] struct built once at startup.
//! - Layer sources: built-in defaults, optional TOML file, then
//!   `CONTACTS_*` environment variables.
//! - Validate values before any component is constructed from them.
//!
//! # Invariants
//! - Components receive `&Settings`; nothing reads configuration ambiently.
//! - The signing secret never appears in `Debug` output or logs.

use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "CONTACTS_";

const DEFAULT_ALGORITHM: &str = "HS256";
const DEFAULT_ACCESS_TTL_MINUTES: i64 = 150;
const DEFAULT_REFRESH_TTL_DAYS: i64 = 7;
const DEFAULT_EMAIL_TTL_DAYS: i64 = 7;
const DEFAULT_POOL_SIZE: u32 = 5;
const DEFAULT_POOL_TIMEOUT_MS: u64 = 30_000;
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

/// Immutable runtime configuration.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Store location; empty means the session manager stays uninitialized.
    pub database_url: String,
    /// Symmetric signing secret for all token kinds.
    pub secret_key: String,
    /// HMAC algorithm name (`HS256`, `HS384`, `HS512`).
    pub algorithm: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub email_token_ttl_days: i64,
    pub pool_size: u32,
    pub pool_timeout_ms: u64,
    pub bcrypt_cost: u32,
    /// When set, login is refused until the email address is confirmed.
    pub require_confirmed_email: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            secret_key: String::new(),
            algorithm: DEFAULT_ALGORITHM.to_string(),
            access_token_ttl_minutes: DEFAULT_ACCESS_TTL_MINUTES,
            refresh_token_ttl_days: DEFAULT_REFRESH_TTL_DAYS,
            email_token_ttl_days: DEFAULT_EMAIL_TTL_DAYS,
            pool_size: DEFAULT_POOL_SIZE,
            pool_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            require_confirmed_email: false,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("database_url", &self.database_url)
            .field("secret_key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("access_token_ttl_minutes", &self.access_token_ttl_minutes)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("email_token_ttl_days", &self.email_token_ttl_days)
            .field("pool_size", &self.pool_size)
            .field("pool_timeout_ms", &self.pool_timeout_ms)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("require_confirmed_email", &self.require_confirmed_email)
            .finish()
    }
}

/// Configuration loading or validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Env {
        var: String,
        value: String,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config file: {err}"),
            Self::Env { var, value } => write!(f, "invalid value `{value}` for {var}"),
            Self::Invalid { field, reason } => write!(f, "invalid `{field}`: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Env { .. } | Self::Invalid { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

impl Settings {
    /// Loads settings from an optional TOML file plus process environment,
    /// then validates them.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match config_path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Reads and parses a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Overrides fields from `CONTACTS_*` variables resolved through `lookup`.
    ///
    /// Unset variables leave the current value untouched.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, value)) = var("DATABASE_URL") {
            self.database_url = value;
        }
        if let Some((_, value)) = var("SECRET_KEY") {
            self.secret_key = value;
        }
        if let Some((_, value)) = var("ALGORITHM") {
            self.algorithm = value;
        }
        if let Some((name, value)) = var("ACCESS_TTL_MINUTES") {
            self.access_token_ttl_minutes = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("REFRESH_TTL_DAYS") {
            self.refresh_token_ttl_days = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("EMAIL_TTL_DAYS") {
            self.email_token_ttl_days = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("POOL_SIZE") {
            self.pool_size = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("POOL_TIMEOUT_MS") {
            self.pool_timeout_ms = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("BCRYPT_COST") {
            self.bcrypt_cost = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("REQUIRE_CONFIRMED_EMAIL") {
            self.require_confirmed_email = parse_env_bool(name, value)?;
        }
        Ok(())
    }

    /// Checks every field that a constructor would otherwise reject later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(invalid("secret_key", "must not be empty"));
        }
        self.signing_algorithm()?;
        for (field, value) in [
            ("access_token_ttl_minutes", self.access_token_ttl_minutes),
            ("refresh_token_ttl_days", self.refresh_token_ttl_days),
            ("email_token_ttl_days", self.email_token_ttl_days),
        ] {
            if value <= 0 {
                return Err(invalid(field, format!("must be positive, got {value}")));
            }
        }
        self.access_token_ttl()?;
        self.refresh_token_ttl()?;
        self.email_token_ttl()?;
        if self.pool_size == 0 {
            return Err(invalid("pool_size", "must be at least 1"));
        }
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(invalid(
                "bcrypt_cost",
                format!(
                    "must be within {MIN_BCRYPT_COST}..={MAX_BCRYPT_COST}, got {}",
                    self.bcrypt_cost
                ),
            ));
        }
        Ok(())
    }

    /// Resolves the configured algorithm name; only HMAC algorithms qualify.
    pub fn signing_algorithm(&self) -> Result<Algorithm, ConfigError> {
        let name = self.algorithm.trim().to_ascii_uppercase();
        let algorithm = Algorithm::from_str(&name)
            .map_err(|_| invalid("algorithm", format!("unknown algorithm `{}`", self.algorithm)))?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            other => Err(invalid(
                "algorithm",
                format!("{other:?} needs an asymmetric key pair; only HS256/HS384/HS512 are supported"),
            )),
        }
    }

    pub fn access_token_ttl(&self) -> Result<chrono::Duration, ConfigError> {
        let minutes = self.access_token_ttl_minutes;
        chrono::Duration::try_minutes(minutes)
            .ok_or_else(|| ttl_out_of_range("access_token_ttl_minutes", minutes))
    }

    pub fn refresh_token_ttl(&self) -> Result<chrono::Duration, ConfigError> {
        let days = self.refresh_token_ttl_days;
        chrono::Duration::try_days(days).ok_or_else(|| ttl_out_of_range("refresh_token_ttl_days", days))
    }

    pub fn email_token_ttl(&self) -> Result<chrono::Duration, ConfigError> {
        let days = self.email_token_ttl_days;
        chrono::Duration::try_days(days).ok_or_else(|| ttl_out_of_range("email_token_ttl_days", days))
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn ttl_out_of_range(field: &'static str, value: i64) -> ConfigError {
    invalid(field, format!("{value} is too large to represent as a duration"))
}

fn parse_env<T: FromStr>(var: String, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

fn parse_env_bool(var: String, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Settings};
    use jsonwebtoken::Algorithm;
    use std::collections::HashMap;

    fn valid() -> Settings {
        Settings {
            secret_key: "s3cret".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn defaults_match_documented_lifetimes() {
        let settings = Settings::default();
        assert_eq!(settings.access_token_ttl().unwrap().num_minutes(), 150);
        assert_eq!(settings.refresh_token_ttl().unwrap().num_days(), 7);
        assert_eq!(settings.email_token_ttl().unwrap().num_days(), 7);
        assert_eq!(settings.algorithm, "HS256");
        assert!(settings.database_url.is_empty());
    }

    #[test]
    fn toml_overrides_only_present_keys() {
        let settings = Settings::from_toml_str(
            r#"
            database_url = "sqlite://contacts.db"
            secret_key = "abc"
            access_token_ttl_minutes = 15
            "#,
        )
        .unwrap();
        assert_eq!(settings.database_url, "sqlite://contacts.db");
        assert_eq!(settings.access_token_ttl_minutes, 15);
        assert_eq!(settings.refresh_token_ttl_days, 7);
    }

    #[test]
    fn toml_rejects_unknown_keys() {
        let err = Settings::from_toml_str("secret = \"typo\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CONTACTS_SECRET_KEY", "from-env"),
            ("CONTACTS_POOL_SIZE", "9"),
            ("CONTACTS_REQUIRE_CONFIRMED_EMAIL", "yes"),
        ]);
        let mut settings = valid();
        settings
            .apply_env(|name| env.get(name).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(settings.secret_key, "from-env");
        assert_eq!(settings.pool_size, 9);
        assert!(settings.require_confirmed_email);
    }

    #[test]
    fn env_with_unparsable_number_is_reported() {
        let mut settings = valid();
        let err = settings
            .apply_env(|name| (name == "CONTACTS_POOL_SIZE").then(|| "many".to_string()))
            .unwrap_err();
        match err {
            ConfigError::Env { var, value } => {
                assert_eq!(var, "CONTACTS_POOL_SIZE");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validate_rejects_empty_secret_and_bad_lifetimes() {
        assert!(matches!(
            Settings::default().validate(),
            Err(ConfigError::Invalid { field: "secret_key", .. })
        ));

        let mut settings = valid();
        settings.refresh_token_ttl_days = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field: "refresh_token_ttl_days", .. })
        ));

        let mut settings = valid();
        settings.bcrypt_cost = 3;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field: "bcrypt_cost", .. })
        ));
    }

    #[test]
    fn validate_rejects_lifetimes_too_large_for_a_duration() {
        let mut settings = valid();
        settings.access_token_ttl_minutes = i64::MAX;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field: "access_token_ttl_minutes", .. })
        ));
        assert!(settings.access_token_ttl().is_err());

        let mut settings = valid();
        settings.email_token_ttl_days = i64::MAX;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field: "email_token_ttl_days", .. })
        ));
    }

    #[test]
    fn signing_algorithm_accepts_hmac_only() {
        let mut settings = valid();
        settings.algorithm = "hs512".to_string();
        assert_eq!(settings.signing_algorithm().unwrap(), Algorithm::HS512);

        settings.algorithm = "RS256".to_string();
        assert!(settings.signing_algorithm().is_err());

        settings.algorithm = "none".to_string();
        assert!(settings.signing_algorithm().is_err());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
