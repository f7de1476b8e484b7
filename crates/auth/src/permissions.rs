use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use storedesk_core::{DomainError, DomainResult};

/// Permission identifier.
///
/// Permission keys are opaque strings (e.g. "users.create"), compared by exact,
/// case-sensitive match. There is no wildcard: every grant is explicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionKey(Cow<'static, str>);

impl PermissionKey {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Parse untrusted input (operator-typed keys, imported policy files).
    pub fn parse(name: &str) -> DomainResult<Self> {
        if name.is_empty() {
            return Err(DomainError::validation("permission key must not be empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "permission key '{name}' must not contain whitespace"
            )));
        }
        Ok(Self(Cow::Owned(name.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading segment of a dotted key (`"users.create"` -> `"users"`).
    pub fn category(&self) -> &str {
        self.as_str().split('.').next().unwrap_or_default()
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for PermissionKey {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PermissionKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
