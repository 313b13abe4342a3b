//! Configuration binding for freshly constructed drivers.
//!
//! Drivers declare their options statically as [`OptionSpec`] lists. The
//! binder merges those declared defaults with caller supplied overrides into
//! a [`Configuration`] and hands the result to the driver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::{Driver, DriverError, OptionSpec};

/// A single configuration value.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer or floating point number.
    Number(serde_json::Number),
    /// Free-form string.
    String(String),
    /// List of strings.
    List(Vec<String>),
}

impl OptionValue {
    /// Returns the value as a string slice when it is a string.
    #[must_use]
    pub const fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the value as a boolean when it is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a signed integer when it is an integral number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(value) => value.as_i64(),
            _ => None,
        }
    }

    /// Returns the value as a list of strings when it is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    /// Short name of the value's type, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Caller supplied overrides keyed by option name.
pub type Overrides = BTreeMap<String, OptionValue>;

/// Merged configuration handed to [`Driver::apply_config`].
///
/// Declared options come first, in declaration order, followed by any
/// undeclared override keys in key order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Configuration {
    entries: Vec<(String, OptionValue)>,
}

impl Configuration {
    /// Looks up a value by option name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Returns `true` when the option is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over option names in merge order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Iterates over `(name, value)` pairs in merge order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of options present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no options are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads a string option. Absent options read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidConfig`] when the option holds a value of
    /// another type.
    pub fn string(&self, name: &str) -> Result<Option<&str>, DriverError> {
        self.typed(name, "string", OptionValue::as_str)
    }

    /// Reads a boolean option. Absent options read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidConfig`] on a type mismatch.
    pub fn bool(&self, name: &str) -> Result<Option<bool>, DriverError> {
        self.typed(name, "bool", OptionValue::as_bool)
    }

    /// Reads an integer option. Absent options read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidConfig`] on a type mismatch.
    pub fn integer(&self, name: &str) -> Result<Option<i64>, DriverError> {
        self.typed(name, "integer", OptionValue::as_i64)
    }

    /// Reads a string list option. A single string is accepted as a one
    /// element list. Absent options read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidConfig`] on a type mismatch.
    pub fn list(&self, name: &str) -> Result<Option<Vec<String>>, DriverError> {
        match self.get(name) {
            None => Ok(None),
            Some(OptionValue::List(values)) => Ok(Some(values.clone())),
            Some(OptionValue::String(value)) => Ok(Some(vec![value.clone()])),
            Some(other) => Err(type_mismatch(name, "list", other)),
        }
    }

    fn typed<'a, T>(
        &'a self,
        name: &str,
        expected: &str,
        convert: impl FnOnce(&'a OptionValue) -> Option<T>,
    ) -> Result<Option<T>, DriverError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        convert(value)
            .map(Some)
            .ok_or_else(|| type_mismatch(name, expected, value))
    }
}

fn type_mismatch(name: &str, expected: &str, found: &OptionValue) -> DriverError {
    DriverError::InvalidConfig(format!(
        "option {name} must be a {expected}, got a {}",
        found.kind()
    ))
}

/// Raised when a driver rejects its merged configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct InvalidConfig(pub String);

/// Merges declared defaults with overrides.
///
/// Overrides naming a declared option replace its default. Overrides naming
/// nothing the driver declared are carried through unchanged after the
/// declared options; they never stand in for a default.
#[must_use]
pub fn merge(declared: &[OptionSpec], overrides: &Overrides) -> Configuration {
    let mut entries: Vec<(String, OptionValue)> = declared
        .iter()
        .map(|spec| {
            let value = overrides
                .get(&spec.name)
                .cloned()
                .unwrap_or_else(|| spec.default.clone());
            (spec.name.clone(), value)
        })
        .collect();

    let extras: Vec<(String, OptionValue)> = overrides
        .iter()
        .filter(|(key, _)| !declared.iter().any(|spec| &spec.name == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    entries.extend(extras);

    Configuration { entries }
}

/// Applies a merged configuration to a driver.
///
/// # Errors
///
/// Returns [`InvalidConfig`] carrying the driver's own message when the
/// driver rejects the configuration.
pub fn apply(driver: &mut dyn Driver, config: &Configuration) -> Result<(), InvalidConfig> {
    driver
        .apply_config(config)
        .map_err(|err| InvalidConfig(err.to_string()))
}

/// Merges and applies in one step, returning the configuration that was
/// applied.
///
/// # Errors
///
/// Returns [`InvalidConfig`] when the driver rejects the configuration.
pub fn bind(driver: &mut dyn Driver, overrides: &Overrides) -> Result<Configuration, InvalidConfig> {
    let config = merge(&driver.declare_options(), overrides);
    apply(driver, &config)?;
    Ok(config)
}

#[cfg(test)]
mod tests;
