// ABOUTME: Environment variable parsing utilities
// ABOUTME: Typed parsing with defaults, validation and fallbacks for KL_* variables

use std::str::FromStr;

/// Parse an environment variable with a fallback default value
/// Returns the parsed value or the default if the variable is not set or cannot be parsed
pub fn parse_env_or_default<T>(var_name: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(var_name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse an environment variable with validation
/// Logs a warning and falls back to the default when the value is unparseable or rejected
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    match std::env::var(var_name) {
        Ok(raw_value) => match raw_value.parse::<T>() {
            Ok(parsed_value) if validator(parsed_value) => parsed_value,
            Ok(_) => {
                tracing::warn!(
                    "Environment variable {} has invalid value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
            Err(_) => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse an environment variable with fallback to another variable
/// Tries the primary variable first, then falls back to the secondary, then to the default
pub fn parse_env_with_fallback<T>(primary_var: &str, fallback_var: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(primary_var)
        .or_else(|_| std::env::var(fallback_var))
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a string variable, treating an empty value as unset
pub fn non_empty_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

/// Boolean flag parsing that accepts `true`/`1`/`yes`
pub fn env_flag(var_name: &str) -> bool {
    matches!(
        std::env::var(var_name)
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref(),
        Ok("true") | Ok("1") | Ok("yes")
    )
}
