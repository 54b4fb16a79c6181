//! Channel handle shared by coordinator and worker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IpcError;

const MAX_HANDLE_LEN: usize = 128;

/// Opaque name of a coordinator/worker channel pair.
///
/// The coordinator passes the handle on the worker's command line. Handles
/// double as directory names for the file channel, so only ASCII
/// alphanumerics, `.`, `_` and `-` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelHandle(String);

impl ChannelHandle {
    /// Validate and wrap a raw handle
    pub fn new(raw: impl Into<String>) -> Result<Self, IpcError> {
        let raw = raw.into();
        let invalid = |reason: &str| IpcError::InvalidHandle {
            handle: raw.clone(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("handle cannot be empty"));
        }
        if raw.len() > MAX_HANDLE_LEN {
            return Err(invalid(&format!("handle longer than {} characters", MAX_HANDLE_LEN)));
        }
        if raw == "." || raw == ".." {
            return Err(invalid("handle cannot be a relative path component"));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(invalid(&format!("unsupported character {:?}", bad)));
        }

        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelHandle {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChannelHandle {
    type Error = IpcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelHandle> for String {
    fn from(handle: ChannelHandle) -> Self {
        handle.0
    }
}

impl AsRef<str> for ChannelHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_handles() {
        for raw in ["abc123", "doc-worker_1", "a.b.c", "0"] {
            let handle = ChannelHandle::new(raw).unwrap();
            assert_eq!(handle.as_str(), raw);
            assert_eq!(handle.to_string(), raw);
        }
    }

    #[test]
    fn test_invalid_handles() {
        let too_long = "x".repeat(MAX_HANDLE_LEN + 1);
        for raw in ["", ".", "..", "a/b", "a\\b", "with space", too_long.as_str()] {
            let err = ChannelHandle::new(raw).unwrap_err();
            assert!(matches!(err, IpcError::InvalidHandle { .. }), "{raw:?} accepted");
        }
    }

    #[test]
    fn test_serde_rejects_invalid_handle() {
        let parsed: Result<ChannelHandle, _> = serde_json::from_str("\"../escape\"");
        assert!(parsed.is_err());

        let handle: ChannelHandle = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(handle.as_str(), "abc123");
    }
}
