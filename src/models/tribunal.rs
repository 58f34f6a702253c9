//! Tribunal identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing identity of an external tribunal.
///
/// The inner value is the registry key derived from a parsed case number,
/// e.g. `"TJSP"` for the São Paulo state judiciary or `"TRT2"` for the
/// 2nd-region labor tribunal. One scheduler worker exists per distinct id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TribunalId(String);

impl TribunalId {
    /// Creates a new tribunal id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TribunalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TribunalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TribunalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
