//! Versioned extension record.
//!
//! Sessions, participants and tasks carry caller-supplied options that the
//! controller stores and echoes back but never interprets, apart from a few
//! documented lookups (e.g. a transcription `language` fallback). Values are
//! restricted to primitives so the record stays flat and schema-checkable.
//!
//! # Wire format
//!
//! ```json
//! { "version": 1, "values": { "language": "en", "priority": 3, "mute": false } }
//! ```
//!
//! Both fields are optional on input; an empty object is an empty record at
//! the current version.

use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current extension record schema version.
pub const EXTENSIONS_VERSION: u32 = 1;

/// Maximum number of keys in one record.
pub const MAX_EXTENSION_KEYS: usize = 32;

/// Maximum key length in bytes.
pub const MAX_EXTENSION_KEY_LENGTH: usize = 64;

/// Maximum text value length in bytes.
pub const MAX_EXTENSION_TEXT_LENGTH: usize = 1024;

/// A single primitive extension value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Opaque, versioned key-value record of primitive values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extensions {
    #[serde(default = "current_version")]
    pub version: u32,

    #[serde(default)]
    pub values: BTreeMap<String, ExtensionValue>,
}

fn current_version() -> u32 {
    EXTENSIONS_VERSION
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            version: EXTENSIONS_VERSION,
            values: BTreeMap::new(),
        }
    }
}

impl Extensions {
    /// Create an empty record at the current version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful in tests.
    #[must_use]
    pub fn with(mut self, key: &str, value: ExtensionValue) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a text value.
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ExtensionValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Validate size and version limits.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::InvalidExtension` describing the first violation.
    pub fn validate(&self) -> Result<(), CommonError> {
        if self.version == 0 || self.version > EXTENSIONS_VERSION {
            return Err(CommonError::InvalidExtension(format!(
                "unsupported version {}",
                self.version
            )));
        }

        if self.values.len() > MAX_EXTENSION_KEYS {
            return Err(CommonError::InvalidExtension(format!(
                "at most {MAX_EXTENSION_KEYS} keys allowed"
            )));
        }

        for (key, value) in &self.values {
            if key.is_empty() || key.len() > MAX_EXTENSION_KEY_LENGTH {
                return Err(CommonError::InvalidExtension(format!(
                    "key length must be 1..={MAX_EXTENSION_KEY_LENGTH}"
                )));
            }
            match value {
                ExtensionValue::Text(s) if s.len() > MAX_EXTENSION_TEXT_LENGTH => {
                    return Err(CommonError::InvalidExtension(format!(
                        "value for '{key}' exceeds {MAX_EXTENSION_TEXT_LENGTH} bytes"
                    )));
                }
                ExtensionValue::Float(f) if !f.is_finite() => {
                    return Err(CommonError::InvalidExtension(format!(
                        "value for '{key}' is not finite"
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}
