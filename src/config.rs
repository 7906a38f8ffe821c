//! Session configuration.
//!
//! Options come from serde defaults, optionally a JSON document, then
//! `PGP_ENVELOPE_*` environment variables:
//!
//! | Variable                          | Field                        |
//! |-----------------------------------|------------------------------|
//! | `PGP_ENVELOPE_ARMOR`              | `encrypt.armor`              |
//! | `PGP_ENVELOPE_INTEGRITY_CHECK`    | `encrypt.integrity_check`    |
//! | `PGP_ENVELOPE_COMPRESSION`        | `encrypt.compression`        |
//! | `PGP_ENVELOPE_SYMMETRIC`          | `encrypt.symmetric`          |
//! | `PGP_ENVELOPE_INTEGRITY_POLICY`   | `decrypt.integrity_policy`   |

use crate::codec::{DecryptOptions, EncryptOptions};
use crate::error::{PgpError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Prefix shared by all environment overrides
pub const ENV_PREFIX: &str = "PGP_ENVELOPE_";

/// Defaults applied by a [`Session`](crate::session::Session)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Encryption defaults
    pub encrypt: EncryptOptions,
    /// Decryption behaviour
    pub decrypt: DecryptOptions,
}

impl EnvelopeConfig {
    /// Parses a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PgpError::config(format!("Invalid configuration: {e}")))
    }

    /// Reads a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_json(&json)
    }

    /// Defaults with the process environment applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Applies `PGP_ENVELOPE_*` pairs; other names are ignored
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(field) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match field {
                "ARMOR" => self.encrypt.armor = parse_flag(field, value)?,
                "INTEGRITY_CHECK" => self.encrypt.integrity_check = parse_flag(field, value)?,
                "COMPRESSION" => self.encrypt.compression = parse_name(field, value)?,
                "SYMMETRIC" => self.encrypt.symmetric = parse_name(field, value)?,
                "INTEGRITY_POLICY" => self.decrypt.integrity_policy = parse_name(field, value)?,
                _ => {
                    return Err(PgpError::config(format!(
                        "Unknown setting {ENV_PREFIX}{field}"
                    )))
                }
            }
            debug!("Configuration override {}{} = {}", ENV_PREFIX, field, value);
        }
        Ok(())
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PgpError::config(format!(
            "{ENV_PREFIX}{field} expects a boolean, got '{value}'"
        ))),
    }
}

/// Parses a value by its serde name, so overrides accept the same spelling as JSON
fn parse_name<T: DeserializeOwned>(field: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase())).map_err(|_| {
        PgpError::config(format!("{ENV_PREFIX}{field} does not accept '{value}'"))
    })
}
