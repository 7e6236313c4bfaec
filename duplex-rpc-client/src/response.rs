//! Response types.
//!
//! This module provides [`Response`], which pairs the single response
//! message of a unary or client-streaming call with the call's header and
//! trailer metadata.

use std::ops::Deref;

use duplex_rpc_core::{Metadata, Status};

/// Response wrapper for single-response calls.
///
/// # Example
///
/// ```ignore
/// let response = client.unary::<Req, Res>(&method, &req)?.await?;
///
/// // Access the response directly via Deref
/// println!("Answer: {}", response.answer);
///
/// // Header and trailer metadata
/// if let Some(value) = response.headers().get("x-example") {
///     println!("header: {value}");
/// }
/// let trailers = response.trailers();
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    inner: T,
    headers: Metadata,
    trailers: Metadata,
    status: Status,
}

impl<T> Response<T> {
    pub fn new(inner: T, headers: Metadata, trailers: Metadata, status: Status) -> Self {
        Self {
            inner,
            headers,
            trailers,
            status,
        }
    }

    /// Extract the inner value, discarding metadata.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Header metadata sent by the peer (empty if none).
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    /// Trailer metadata sent with the terminal status.
    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }

    /// The terminal status. Always OK for a response that carries a message.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Transform the inner value, preserving metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            inner: f(self.inner),
            headers: self.headers,
            trailers: self.trailers,
            status: self.status,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Split into the message, header metadata and trailer metadata.
    pub fn into_parts(self) -> (T, Metadata, Metadata) {
        (self.inner, self.headers, self.trailers)
    }
}

impl<T> Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: &str) -> Response<String> {
        let mut headers = Metadata::empty();
        headers.insert("x-h", "1").unwrap();
        let mut trailers = Metadata::empty();
        trailers.insert("x-t", "2").unwrap();
        Response::new(value.to_string(), headers, trailers, Status::ok())
    }

    #[test]
    fn test_response_deref_and_map() {
        let resp = response("hello");
        assert_eq!(resp.len(), 5);
        let mapped = resp.map(|s| s.len());
        assert_eq!(*mapped, 5);
        assert_eq!(mapped.headers().get("x-h"), Some("1"));
        assert!(mapped.status().is_ok());
    }

    #[test]
    fn test_response_into_parts() {
        let (inner, headers, trailers) = response("x").into_parts();
        assert_eq!(inner, "x");
        assert_eq!(headers.get("x-h"), Some("1"));
        assert_eq!(trailers.get("x-t"), Some("2"));
    }
}
