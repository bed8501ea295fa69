use crate::error::{Result, ShieldError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A credential string that must never appear in logs.
///
/// Debug, Display and serialization all print `[REDACTED]`; the value is
/// only reachable through [`Secret::expose`].
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read a secret from an environment variable.
    ///
    /// # Errors
    /// Returns an error if the variable is unset or empty.
    pub fn from_env(var_name: &str) -> Result<Self> {
        match std::env::var(var_name) {
            Ok(val) if val.is_empty() => Err(ShieldError::Credential(format!(
                "environment variable '{var_name}' is empty"
            ))),
            Ok(val) => Ok(Self(val)),
            Err(e) => Err(ShieldError::Credential(format!(
                "environment variable '{var_name}' not set: {e}"
            ))),
        }
    }

    /// Expose the secret value (use with caution)
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Never serialize the actual value
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Secret::new(value))
    }
}
