//! Method and service descriptors.
//!
//! A [`MethodDescriptor`] names a remote operation and fixes how many
//! messages flow in each direction. The pair of cardinalities is the
//! [`CallShape`].

use std::fmt;

/// How many messages flow in one direction of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Exactly one message.
    Single,
    /// Zero or more messages.
    Stream,
}

/// The four shapes of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallShape {
    Unary,
    ServerStream,
    ClientStream,
    Bidi,
}

impl CallShape {
    /// Derive the shape from request and response cardinality.
    pub fn from_cardinality(request: Cardinality, response: Cardinality) -> Self {
        match (request, response) {
            (Cardinality::Single, Cardinality::Single) => CallShape::Unary,
            (Cardinality::Single, Cardinality::Stream) => CallShape::ServerStream,
            (Cardinality::Stream, Cardinality::Single) => CallShape::ClientStream,
            (Cardinality::Stream, Cardinality::Stream) => CallShape::Bidi,
        }
    }

    pub fn request_cardinality(&self) -> Cardinality {
        match self {
            CallShape::Unary | CallShape::ServerStream => Cardinality::Single,
            CallShape::ClientStream | CallShape::Bidi => Cardinality::Stream,
        }
    }

    pub fn response_cardinality(&self) -> Cardinality {
        match self {
            CallShape::Unary | CallShape::ClientStream => Cardinality::Single,
            CallShape::ServerStream | CallShape::Bidi => Cardinality::Stream,
        }
    }

    /// Whether the caller drives the request channel explicitly.
    pub fn streams_requests(&self) -> bool {
        self.request_cardinality() == Cardinality::Stream
    }

    /// Whether more than one response may arrive.
    pub fn streams_responses(&self) -> bool {
        self.response_cardinality() == Cardinality::Stream
    }

    /// Name used in logs and spans.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStream => "server_stream",
            CallShape::ClientStream => "client_stream",
            CallShape::Bidi => "bidi_stream",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a remote operation.
///
/// # Example
///
/// ```
/// use duplex_rpc_core::{CallShape, MethodDescriptor};
///
/// let method = MethodDescriptor::server_stream("example.ExampleService", "ServerStream");
/// assert_eq!(method.path(), "/example.ExampleService/ServerStream");
/// assert_eq!(method.shape(), CallShape::ServerStream);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    service: String,
    method: String,
    request: Cardinality,
    response: Cardinality,
}

impl MethodDescriptor {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        request: Cardinality,
        response: Cardinality,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            request,
            response,
        }
    }

    pub fn unary(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(service, method, Cardinality::Single, Cardinality::Single)
    }

    pub fn server_stream(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(service, method, Cardinality::Single, Cardinality::Stream)
    }

    pub fn client_stream(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(service, method, Cardinality::Stream, Cardinality::Single)
    }

    pub fn bidi(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(service, method, Cardinality::Stream, Cardinality::Stream)
    }

    /// Fully-qualified service name (e.g., "example.ExampleService").
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name within the service (e.g., "Unary").
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn request_cardinality(&self) -> Cardinality {
        self.request
    }

    pub fn response_cardinality(&self) -> Cardinality {
        self.response
    }

    pub fn shape(&self) -> CallShape {
        CallShape::from_cardinality(self.request, self.response)
    }

    /// The request path, `/{service}/{method}`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

/// The methods of one service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method with the given cardinalities.
    pub fn with_method(
        mut self,
        method: impl Into<String>,
        request: Cardinality,
        response: Cardinality,
    ) -> Self {
        let descriptor = MethodDescriptor::new(self.name.clone(), method, request, response);
        self.methods.push(descriptor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.method() == name)
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}
