//! Message encoding.

use bytes::Bytes;
use prost::Message;
use serde::{Serialize, de::DeserializeOwned};

use crate::ClientError;

/// How request and response messages are serialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// `serde_json`.
    #[default]
    Json,
    /// Protobuf binary via `prost`.
    Proto,
}

impl Encoding {
    /// Get the encoding name (for tracing/debugging).
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Proto => "proto",
        }
    }

    /// Content type announced in request metadata.
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => "application/grpc+json",
            Encoding::Proto => "application/grpc+proto",
        }
    }

    /// Recognize a content type announced by [`content_type`](Self::content_type).
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "application/grpc+json" | "application/json" => Some(Encoding::Json),
            "application/grpc+proto" | "application/grpc" | "application/proto" => {
                Some(Encoding::Proto)
            }
            _ => None,
        }
    }

    /// Encode a message for sending.
    pub fn encode<T>(&self, msg: &T) -> Result<Bytes, ClientError>
    where
        T: Message + Serialize,
    {
        match self {
            Encoding::Proto => Ok(Bytes::from(msg.encode_to_vec())),
            Encoding::Json => serde_json::to_vec(msg)
                .map(Bytes::from)
                .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {}", e))),
        }
    }

    /// Decode a message from received bytes.
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T, ClientError>
    where
        T: Message + DeserializeOwned + Default,
    {
        match self {
            Encoding::Proto => T::decode(bytes)
                .map_err(|e| ClientError::Decode(format!("protobuf decoding failed: {}", e))),
            Encoding::Json => serde_json::from_slice(bytes)
                .map_err(|e| ClientError::Decode(format!("JSON decoding failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Greeting {
        #[prost(string, tag = "1")]
        #[serde(default)]
        text: String,
        #[prost(int32, tag = "2")]
        #[serde(default)]
        count: i32,
    }

    #[test]
    fn test_json_encoding() {
        let msg = Greeting {
            text: "hi".into(),
            count: 2,
        };
        let bytes = Encoding::Json.encode(&msg).unwrap();
        assert_eq!(bytes.as_ref(), br#"{"text":"hi","count":2}"#);
        let back: Greeting = Encoding::Json.decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_proto_encoding() {
        let msg = Greeting {
            text: "hi".into(),
            count: 0,
        };
        let bytes = Encoding::Proto.encode(&msg).unwrap();
        assert_eq!(bytes.as_ref(), &[0x0a, 0x02, b'h', b'i']);
        let back: Greeting = Encoding::Proto.decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_decode_errors() {
        let err = Encoding::Json.decode::<Greeting>(b"not json").unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(err.message().starts_with("JSON decoding failed"));

        let err = Encoding::Proto.decode::<Greeting>(&[0xff]).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn test_content_type_round_trip() {
        for encoding in [Encoding::Json, Encoding::Proto] {
            assert_eq!(
                Encoding::from_content_type(encoding.content_type()),
                Some(encoding)
            );
        }
        assert_eq!(Encoding::from_content_type("text/plain"), None);
        assert_eq!(Encoding::default(), Encoding::Json);
    }
}
