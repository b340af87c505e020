use std::env;

use crate::error::AppError;

/// Deployment environment. Drives strictness: required configuration has no
/// fallback in production, CORS and cookie policies tighten, fingerprint
/// mismatches become hard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn is_prod(self) -> bool {
        self == Environment::Prod
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Read an environment variable with a dev-only default.
///
/// In production a missing value is a startup error; in dev the default
/// applies. Values with no default are required everywhere.
pub fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::Config(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::Config(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Parse a human duration of the `15m` / `7d` / `30s` / `12h` form into
/// seconds. Bare numbers are seconds.
pub fn parse_duration_secs(value: &str) -> Result<i64, AppError> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };

    let n: i64 = number.parse().map_err(|_| {
        AppError::Config(anyhow::anyhow!("Invalid duration value: {}", value))
    })?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(AppError::Config(anyhow::anyhow!(
                "Invalid duration unit in: {}",
                value
            )))
        }
    };

    Ok(n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_forms() {
        assert_eq!(parse_duration_secs("15m").unwrap(), 900);
        assert_eq!(parse_duration_secs("7d").unwrap(), 604800);
        assert_eq!(parse_duration_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_secs("12h").unwrap(), 43200);
        assert_eq!(parse_duration_secs("45").unwrap(), 45);
    }

    #[test]
    fn rejects_unknown_units() {
        assert!(parse_duration_secs("15w").is_err());
        assert!(parse_duration_secs("abc").is_err());
    }

    #[test]
    fn environment_parses_both_spellings() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Prod
        );
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }
}
