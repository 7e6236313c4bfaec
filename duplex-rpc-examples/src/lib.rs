use std::collections::HashMap;

use duplex_rpc_core::{Cardinality, MethodDescriptor, ServiceDescriptor};
use serde::{Deserialize, Serialize};

mod service;

pub use service::{ExampleService, serve};

/// Fully-qualified name of the example service.
pub const SERVICE_NAME: &str = "example.ExampleService";

/// How the example service should fail a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FailRequest {
    /// Don't fail.
    None = 0,
    /// Send one response message, then an error status.
    MessageThenErrorStatus = 1,
    /// Send only an error status.
    ErrorStatusOnly = 2,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExampleRequest {
    #[prost(string, tag = "1")]
    pub question: String,
    /// Delay before each response, in milliseconds.
    #[prost(int32, tag = "2")]
    pub please_delay_response_ms: i32,
    #[prost(enumeration = "FailRequest", tag = "3")]
    pub please_fail: i32,
    #[prost(bool, tag = "4")]
    pub disable_sending_example_response_headers: bool,
}

impl ExampleRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: i32) -> Self {
        self.please_delay_response_ms = delay_ms;
        self
    }

    pub fn with_failure(mut self, fail: FailRequest) -> Self {
        self.set_please_fail(fail);
        self
    }

    pub fn without_response_headers(mut self) -> Self {
        self.disable_sending_example_response_headers = true;
        self
    }
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExampleResponse {
    #[prost(string, tag = "1")]
    pub answer: String,
    /// The `grpc-timeout` the request carried, if any.
    #[prost(string, tag = "2")]
    pub your_deadline: String,
    #[prost(map = "string, string", tag = "3")]
    pub your_request_headers: HashMap<String, String>,
}

/// Descriptor of the example service.
pub fn service_descriptor() -> ServiceDescriptor {
    use Cardinality::*;
    ServiceDescriptor::new(SERVICE_NAME)
        .with_method("Unary", Single, Single)
        .with_method("ServerStream", Single, Stream)
        .with_method("ClientStream", Stream, Single)
        .with_method("Bidi", Stream, Stream)
}

pub fn unary_method() -> MethodDescriptor {
    MethodDescriptor::unary(SERVICE_NAME, "Unary")
}

pub fn server_stream_method() -> MethodDescriptor {
    MethodDescriptor::server_stream(SERVICE_NAME, "ServerStream")
}

pub fn client_stream_method() -> MethodDescriptor {
    MethodDescriptor::client_stream(SERVICE_NAME, "ClientStream")
}

pub fn bidi_method() -> MethodDescriptor {
    MethodDescriptor::bidi(SERVICE_NAME, "Bidi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_matches_method_helpers() {
        let descriptor = service_descriptor();
        for method in [
            unary_method(),
            server_stream_method(),
            client_stream_method(),
            bidi_method(),
        ] {
            assert_eq!(descriptor.method(method.method()), Some(&method));
        }
    }

    #[test]
    fn test_request_json_uses_camel_case() {
        let request = ExampleRequest::new("whats up?")
            .with_failure(FailRequest::ErrorStatusOnly)
            .without_response_headers();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["question"], "whats up?");
        assert_eq!(json["pleaseFail"], 2);
        assert_eq!(json["disableSendingExampleResponseHeaders"], true);

        let parsed: ExampleRequest = serde_json::from_str(r#"{"question":"hi"}"#).unwrap();
        assert_eq!(parsed, ExampleRequest::new("hi"));
        assert_eq!(parsed.please_fail(), FailRequest::None);
    }
}
