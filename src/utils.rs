use std::{env, fmt, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("ConfigError: `{value}` is not a valid {key} value")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

pub fn get_env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

pub fn get_env_cast_or<T: FromStr + fmt::Display>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value_raw) => T::from_str(&value_raw).map_err(|_| ConfigError {
            key: key.to_string(),
            value: value_raw,
        }),
        Err(_) => Ok(default),
    }
}
