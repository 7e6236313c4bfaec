//! In-process implementation of the example service.

use std::time::Duration;

use duplex_rpc_client::{
    Encoding, MemoryTransport, Metadata, RequestFrame, Status, TIMEOUT_KEY, TransportCall,
    is_reserved_header,
};
use tracing::{Instrument, debug, info_span};

use crate::{ExampleRequest, ExampleResponse, FailRequest};

/// The example service, served over a [`MemoryTransport`].
///
/// Every method answers each question with `You asked "..."`, honouring the
/// request's delay and failure switches. Response headers carry
/// `x-example-header`; trailers carry `x-example-trailer`.
pub struct ExampleService;

impl ExampleService {
    /// A transport serving this service in-process.
    pub fn transport() -> MemoryTransport {
        MemoryTransport::new(serve)
    }
}

/// Serve one call of the example service.
pub async fn serve(call: TransportCall) {
    let span = info_span!(
        "example.serve",
        rpc.method = %call.method(),
        otel.kind = "server",
    );
    async move {
        let method = call.method().method().to_string();
        let mut exchange = Exchange::new(call);
        let result = match method.as_str() {
            "Unary" => exchange.unary().await,
            "ServerStream" => exchange.server_stream().await,
            "ClientStream" => exchange.client_stream().await,
            "Bidi" => exchange.bidi().await,
            other => Err(Status::unimplemented(format!("unknown method {other}"))),
        };
        exchange.finish(result);
    }
    .instrument(span)
    .await
}

struct Exchange {
    call: TransportCall,
    encoding: Encoding,
    headers_sent: bool,
}

impl Exchange {
    fn new(call: TransportCall) -> Self {
        let encoding = call
            .head()
            .metadata()
            .get("content-type")
            .and_then(Encoding::from_content_type)
            .unwrap_or_default();
        Self {
            call,
            encoding,
            headers_sent: false,
        }
    }

    async fn unary(&mut self) -> Result<(), Status> {
        let request = self.required_request().await?;
        self.send_headers(&request);
        fail_before_messages(&request)?;
        delay(&request).await;
        self.respond(format!("You asked \"{}\"", request.question))?;
        fail_after_message(&request)
    }

    async fn server_stream(&mut self) -> Result<(), Status> {
        let request = self.required_request().await?;
        self.send_headers(&request);
        fail_before_messages(&request)?;
        for i in 1..=3 {
            delay(&request).await;
            self.respond(format!("#{i} You asked \"{}\"", request.question))?;
            fail_after_message(&request)?;
        }
        Ok(())
    }

    async fn client_stream(&mut self) -> Result<(), Status> {
        self.send_headers(&ExampleRequest::default());
        let mut questions = Vec::new();
        let mut last = None;
        while let Some(request) = self.next_request().await? {
            delay(&request).await;
            questions.push(format!("\"{}\"", request.question));
            last = Some(request);
        }
        let last = last.unwrap_or_default();
        fail_before_messages(&last)?;
        self.respond(format!(
            "You asked {} questions: {}",
            questions.len(),
            questions.join(", ")
        ))?;
        fail_after_message(&last)
    }

    async fn bidi(&mut self) -> Result<(), Status> {
        self.send_headers(&ExampleRequest::default());
        while let Some(request) = self.next_request().await? {
            fail_before_messages(&request)?;
            delay(&request).await;
            self.respond(format!("You asked \"{}\"", request.question))?;
            fail_after_message(&request)?;
        }
        Ok(())
    }

    /// Next request, or `None` after the half-close.
    async fn next_request(&mut self) -> Result<Option<ExampleRequest>, Status> {
        match self.call.requests().recv().await {
            Some(RequestFrame::Message(payload)) => self
                .encoding
                .decode(&payload)
                .map(Some)
                .map_err(|e| Status::invalid_argument(e.message())),
            Some(RequestFrame::HalfClose) | None => Ok(None),
            Some(RequestFrame::Reset(status)) => {
                debug!(%status, "call reset by client");
                Err(status)
            }
        }
    }

    async fn required_request(&mut self) -> Result<ExampleRequest, Status> {
        self.next_request()
            .await?
            .ok_or_else(|| Status::invalid_argument("missing request message"))
    }

    fn send_headers(&mut self, request: &ExampleRequest) {
        if self.headers_sent || request.disable_sending_example_response_headers {
            return;
        }
        self.headers_sent = true;
        let mut headers = Metadata::empty();
        let _ = headers.insert("x-example-header", "xxx");
        self.call.driver().send_headers(headers);
    }

    fn respond(&self, answer: String) -> Result<(), Status> {
        let metadata = self.call.head().metadata();
        let response = ExampleResponse {
            answer,
            your_deadline: metadata.get(TIMEOUT_KEY).unwrap_or_default().to_string(),
            your_request_headers: metadata
                .iter()
                .filter(|(name, _)| !is_reserved_header(name))
                .filter_map(|(name, value)| {
                    Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
                })
                .collect(),
        };
        let payload = self
            .encoding
            .encode(&response)
            .map_err(|e| Status::internal(e.message()))?;
        self.call.driver().send_message(payload);
        Ok(())
    }

    fn finish(self, result: Result<(), Status>) {
        let status = match result {
            Ok(()) => Status::ok(),
            Err(status) => status,
        };
        let mut trailers = Metadata::empty();
        let _ = trailers.insert("x-example-trailer", "xxx");
        self.call.driver().finish(status, trailers);
    }
}

fn fail_before_messages(request: &ExampleRequest) -> Result<(), Status> {
    match request.please_fail() {
        FailRequest::ErrorStatusOnly => Err(Status::resource_exhausted("you asked for an error")),
        _ => Ok(()),
    }
}

fn fail_after_message(request: &ExampleRequest) -> Result<(), Status> {
    match request.please_fail() {
        FailRequest::MessageThenErrorStatus => {
            Err(Status::resource_exhausted("you asked for an error after a message"))
        }
        _ => Ok(()),
    }
}

async fn delay(request: &ExampleRequest) {
    if request.please_delay_response_ms > 0 {
        tokio::time::sleep(Duration::from_millis(request.please_delay_response_ms as u64)).await;
    }
}
