//! Call options for per-call configuration.
//!
//! This module provides [`CallOptions`] for configuring individual calls
//! with a deadline and request metadata.

use std::time::Duration;

use duplex_rpc_core::Metadata;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::codec::Encoding;
use crate::transport::RequestHead;

/// Request metadata key carrying the deadline.
pub const TIMEOUT_KEY: &str = "grpc-timeout";

/// Options for configuring individual calls.
///
/// # Example
///
/// ```ignore
/// use duplex_rpc_client::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("authorization", "Bearer token123")
///     .header("x-request-id", "abc-123");
///
/// let call = client.unary_with_options::<Req, Res>(&method, &request, options)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for this call. Overrides the client's default timeout.
    pub(crate) timeout: Option<Duration>,
    /// Request metadata for this call.
    pub(crate) metadata: Metadata,
}

impl CallOptions {
    /// Create new default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline for this call.
    ///
    /// The deadline is sent to the peer as a `grpc-timeout` request entry
    /// and enforced locally: when it elapses first, the call terminates with
    /// `DEADLINE_EXCEEDED`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Add a request metadata entry.
    ///
    /// Keys beginning with "grpc-", plus `content-type` and `te`, are
    /// reserved for the call machinery and are dropped when the call opens.
    ///
    /// # Panics
    ///
    /// Panics if the key or value is invalid, or if the key ends in `-bin`.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        if let Err(e) = self.metadata.append(key, value) {
            panic!("invalid call metadata: {e}");
        }
        self
    }

    /// Try to add a request metadata entry.
    ///
    /// Returns `None` if the key or value is invalid.
    pub fn try_header(mut self, key: &str, value: &str) -> Option<Self> {
        self.metadata.append(key, value).ok()?;
        Some(self)
    }

    /// Try to add a binary request metadata entry (key must end in `-bin`).
    pub fn try_binary_header(mut self, key: &str, value: &[u8]) -> Option<Self> {
        self.metadata.append_bin(key, value).ok()?;
        Some(self)
    }

    /// Set all request metadata, replacing any existing entries.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Get a reference to the request metadata.
    pub fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Get a mutable reference to the request metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Build the head handed to the transport.
    pub(crate) fn into_head(
        self,
        default_timeout: Option<Duration>,
        encoding: Encoding,
    ) -> RequestHead {
        let mut headers = HeaderMap::new();
        for (name, value) in self.metadata.iter() {
            if is_reserved_header(name) {
                tracing::debug!(key = %name, "dropping reserved request metadata");
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(encoding.content_type()));

        let timeout = self.timeout.or(default_timeout);
        if let Some(value) = timeout
            .and_then(duration_to_timeout_header)
            .and_then(|v| HeaderValue::from_str(&v).ok())
        {
            headers.insert(TIMEOUT_KEY, value);
        }

        let head = RequestHead::new(Metadata::new(headers));
        match timeout {
            Some(timeout) => head.with_timeout(timeout),
            None => head,
        }
    }
}

/// Check if a metadata key is reserved for the call machinery.
///
/// Reserved keys should not be supplied through [`CallOptions`].
pub fn is_reserved_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("grpc-") || name == "content-type" || name == "te"
}

/// Largest value a timeout entry may carry (8 digits).
const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Convert a Duration to the `grpc-timeout` value.
///
/// Uses the finest unit (`n`, `u`, `m`, `S`, `M`, `H`) whose value fits in
/// 8 digits, rounding up. Returns `None` if even hours do not fit.
pub(crate) fn duration_to_timeout_header(duration: Duration) -> Option<String> {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return Some("0n".to_string());
    }
    const UNITS: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60_000_000_000, 'M'),
        (3_600_000_000_000, 'H'),
    ];
    UNITS.iter().find_map(|&(per_unit, unit)| {
        let value = nanos.div_ceil(per_unit);
        (value <= MAX_TIMEOUT_VALUE).then(|| format!("{value}{unit}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_default() {
        let options = CallOptions::new();
        assert!(options.timeout.is_none());
        assert!(options.metadata.is_empty());
    }

    #[test]
    fn test_call_options_header() {
        let options = CallOptions::new()
            .header("authorization", "Bearer token123")
            .header("x-request-id", "abc-123");

        assert_eq!(options.metadata.get("authorization"), Some("Bearer token123"));
        assert_eq!(options.metadata.get("x-request-id"), Some("abc-123"));
    }

    #[test]
    fn test_call_options_try_header_invalid() {
        assert!(CallOptions::new().try_header("invalid\0name", "value").is_none());
        assert!(CallOptions::new().try_header("x-bin", "text").is_none());
        assert!(
            CallOptions::new()
                .try_binary_header("x-trace-bin", &[1, 2, 3])
                .is_some()
        );
    }

    #[test]
    #[should_panic(expected = "invalid call metadata")]
    fn test_call_options_header_panics_on_invalid() {
        let _ = CallOptions::new().header("bad key", "value");
    }

    #[test]
    fn test_into_head_drops_reserved_and_sets_content_type() {
        let head = CallOptions::new()
            .header("grpc-status", "0")
            .header("content-type", "text/plain")
            .header("x-user", "alice")
            .into_head(None, Encoding::Proto);

        let md = head.metadata();
        assert_eq!(md.get("x-user"), Some("alice"));
        assert_eq!(md.get("content-type"), Some("application/grpc+proto"));
        assert!(!md.contains("grpc-status"));
        assert!(!md.contains(TIMEOUT_KEY));
        assert_eq!(head.timeout(), None);
    }

    #[test]
    fn test_into_head_timeout_override() {
        let head = CallOptions::new()
            .timeout(Duration::from_millis(250))
            .into_head(Some(Duration::from_secs(30)), Encoding::Json);
        assert_eq!(head.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(head.metadata().get(TIMEOUT_KEY), Some("250000u"));

        let head = CallOptions::new().into_head(Some(Duration::from_secs(30)), Encoding::Json);
        assert_eq!(head.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(head.metadata().get(TIMEOUT_KEY), Some("30000000u"));
    }

    #[test]
    fn test_duration_to_timeout_header() {
        assert_eq!(
            duration_to_timeout_header(Duration::from_nanos(1)),
            Some("1n".to_string())
        );
        assert_eq!(
            duration_to_timeout_header(Duration::from_millis(1)),
            Some("1000000n".to_string())
        );
        assert_eq!(
            duration_to_timeout_header(Duration::from_secs(30)),
            Some("30000000u".to_string())
        );
        assert_eq!(
            duration_to_timeout_header(Duration::from_secs(3600)),
            Some("3600000m".to_string())
        );
        // Rounds up rather than shortening the deadline.
        assert_eq!(
            duration_to_timeout_header(Duration::from_nanos(100_000_001)),
            Some("100001u".to_string())
        );
        assert_eq!(duration_to_timeout_header(Duration::ZERO), Some("0n".to_string()));
        assert_eq!(duration_to_timeout_header(Duration::MAX), None);
    }
}
