// ABOUTME: Shared configuration surface for the kl devbox workspace
// ABOUTME: Exposes environment variable names, defaults and typed parsing helpers

pub mod constants;
pub mod env;

pub use env::{
    env_flag, non_empty_env, parse_env_or_default, parse_env_or_default_with_validation,
    parse_env_with_fallback,
};
