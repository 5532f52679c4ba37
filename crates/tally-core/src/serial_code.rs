use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A rendered serial code.
///
/// Codes carry no identity beyond their text; two codes are equal iff their
/// strings are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialCode(String);

impl SerialCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for SerialCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SerialCode> for String {
    fn from(code: SerialCode) -> Self {
        code.0
    }
}

impl AsRef<str> for SerialCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
