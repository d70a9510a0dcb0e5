//! Secret redaction for keys and API tokens in logs and `Debug` output.

use std::fmt::{self, Debug, Display};

/// Wrapper that never prints its inner value
///
/// ```ignore
/// let key = Redacted("0xac09...".to_string());
/// tracing::info!(key = %key, "Loaded wallet key");
/// // Logs: key = <redacted>
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Access the secret. Callers must not log the result.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> serde::Serialize for Redacted<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        "<redacted>".serialize(serializer)
    }
}
