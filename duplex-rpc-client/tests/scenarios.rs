//! End-to-end call scenarios over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use duplex_rpc_client::{
    CallOptions, Client, ClientError, Code, Encoding, MemoryTransport, Metadata,
    MethodDescriptor, RequestFrame, Status, TransportCall,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
struct ExampleRequest {
    #[prost(string, tag = "1")]
    #[serde(default)]
    question: String,
    #[prost(int32, tag = "2")]
    #[serde(default)]
    please_delay_response_ms: i32,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
struct ExampleResponse {
    #[prost(string, tag = "1")]
    #[serde(default)]
    answer: String,
}

const SERVICE: &str = "example.ExampleService";

fn ask(question: &str) -> ExampleRequest {
    ExampleRequest {
        question: question.into(),
        please_delay_response_ms: 0,
    }
}

fn encoding_of(call: &TransportCall) -> Encoding {
    call.head()
        .metadata()
        .get("content-type")
        .and_then(Encoding::from_content_type)
        .unwrap_or_default()
}

fn reply(call: &TransportCall, answer: &str) {
    let payload = encoding_of(call)
        .encode(&ExampleResponse {
            answer: answer.into(),
        })
        .unwrap();
    call.driver().send_message(payload);
}

async fn drain_requests(call: &mut TransportCall) -> Vec<ExampleRequest> {
    let encoding = encoding_of(call);
    let mut received = Vec::new();
    while let Some(frame) = call.requests().recv().await {
        match frame {
            RequestFrame::Message(payload) => received.push(encoding.decode(&payload).unwrap()),
            RequestFrame::HalfClose | RequestFrame::Reset(_) => break,
        }
    }
    received
}

fn trailers(key: &str, value: &str) -> Metadata {
    let mut md = Metadata::empty();
    md.insert(key, value).unwrap();
    md
}

/// Serves every shape of the example service.
async fn serve(mut call: TransportCall) {
    call.driver().send_headers(trailers("x-example", "header"));
    match call.method().method() {
        "Unary" => {
            let request = drain_requests(&mut call).await.remove(0);
            reply(&call, &format!("echo: {}", request.question));
        }
        "ServerStream" => {
            drain_requests(&mut call).await;
            for i in 0..3 {
                reply(&call, &format!("response {i}"));
            }
        }
        "ClientStream" => {
            let requests = drain_requests(&mut call).await;
            reply(&call, &format!("received {}", requests.len()));
        }
        "Bidi" => {
            for request in drain_requests(&mut call).await {
                reply(&call, &request.question);
            }
        }
        other => {
            call.driver().finish(
                Status::unimplemented(format!("unknown method {other}")),
                Metadata::empty(),
            );
            return;
        }
    }
    call.driver().finish(Status::ok(), trailers("x-example", "trailer"));
}

fn client() -> Client {
    Client::builder(MemoryTransport::new(serve)).build()
}

#[tokio::test]
async fn test_unary_round_trip() {
    let client = client();
    let method = MethodDescriptor::unary(SERVICE, "Unary");
    let call = client
        .unary::<ExampleRequest, ExampleResponse>(&method, &ask("whats up?"))
        .unwrap();

    assert_eq!(call.response().await.unwrap().answer, "echo: whats up?");
    assert_eq!(call.headers().await.get("x-example"), Some("header"));
    assert!(call.status().await.is_ok());
    assert_eq!(call.trailers().await.get("x-example"), Some("trailer"));
    // Re-readable
    assert!(call.status().await.is_ok());

    let response = call.await.unwrap();
    assert_eq!(response.answer, "echo: whats up?");
    assert_eq!(response.trailers().get("x-example"), Some("trailer"));
}

#[tokio::test]
async fn test_unary_proto_encoding() {
    let client = Client::builder(MemoryTransport::new(serve)).use_proto().build();
    let method = MethodDescriptor::unary(SERVICE, "Unary");
    let response = client
        .unary::<ExampleRequest, ExampleResponse>(&method, &ask("binary"))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(response.answer, "echo: binary");
}

#[tokio::test]
async fn test_server_stream_three_then_ok() {
    let client = client();
    let method = MethodDescriptor::server_stream(SERVICE, "ServerStream");
    let call = client
        .server_stream::<ExampleRequest, ExampleResponse>(&method, &ask("stream"))
        .unwrap();

    let answers: Vec<String> = call
        .responses()
        .unwrap()
        .map(|r| r.unwrap().answer)
        .collect()
        .await;
    assert_eq!(answers, vec!["response 0", "response 1", "response 2"]);
    assert!(call.status().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_server_stream_status_follows_last_item() {
    let client = client();
    let method = MethodDescriptor::server_stream(SERVICE, "ServerStream");
    let call = client
        .server_stream::<ExampleRequest, ExampleResponse>(&method, &ask("stream"))
        .unwrap();
    let mut responses = call.responses().unwrap();

    assert_eq!(responses.next().await.unwrap().unwrap().answer, "response 0");
    call.session().terminated().await;
    let pending = tokio::time::timeout(Duration::from_millis(100), call.status()).await;
    assert!(pending.is_err());

    assert_eq!(responses.next().await.unwrap().unwrap().answer, "response 1");
    assert_eq!(responses.next().await.unwrap().unwrap().answer, "response 2");
    assert!(responses.next().await.is_none());
    assert!(call.status().await.is_ok());
    assert_eq!(call.trailers().await.get("x-example"), Some("trailer"));
}

#[tokio::test]
async fn test_headers_resolve_before_first_response() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let transport = MemoryTransport::new(move |call: TransportCall| {
        let gate = gate.clone();
        async move {
            call.driver().send_headers(trailers("x-example", "header"));
            gate.notified().await;
            reply(&call, "first");
            call.driver().finish(Status::ok(), Metadata::empty());
        }
    });
    let client = Client::builder(transport).build();
    let method = MethodDescriptor::server_stream(SERVICE, "ServerStream");
    let call = client
        .server_stream::<ExampleRequest, ExampleResponse>(&method, &ask("x"))
        .unwrap();
    let mut responses = call.responses().unwrap();

    let first = responses.next();
    tokio::pin!(first);
    assert!(futures::poll!(&mut first).is_pending());
    assert_eq!(call.headers().await.get("x-example"), Some("header"));
    assert!(futures::poll!(&mut first).is_pending());

    release.notify_one();
    assert_eq!(first.await.unwrap().unwrap().answer, "first");
}

#[tokio::test]
async fn test_client_stream_three_sends() {
    let client = client();
    let method = MethodDescriptor::client_stream(SERVICE, "ClientStream");
    let call = client
        .client_stream::<ExampleRequest, ExampleResponse>(&method)
        .unwrap();

    let requests = call.requests();
    for q in ["a", "b", "c"] {
        requests.send(&ask(q)).await.unwrap();
    }
    requests.complete().await.unwrap();

    let response = call.await.unwrap();
    assert_eq!(response.answer, "received 3");
    assert!(response.status().is_ok());
}

#[tokio::test]
async fn test_bidi_terminates_only_on_status() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let transport = MemoryTransport::new(move |mut call: TransportCall| {
        let gate = gate.clone();
        async move {
            let requests = drain_requests(&mut call).await;
            gate.notified().await;
            for request in requests {
                reply(&call, &request.question);
            }
            call.driver().finish(Status::ok(), Metadata::empty());
        }
    });
    let client = Client::builder(transport).build();
    let method = MethodDescriptor::bidi(SERVICE, "Bidi");
    let call = client.bidi::<ExampleRequest, ExampleResponse>(&method).unwrap();

    let requests = call.requests();
    requests.send(&ask("one")).await.unwrap();
    requests.send(&ask("two")).await.unwrap();
    requests.complete().await.unwrap();
    assert!(!requests.is_open());

    tokio::task::yield_now().await;
    assert!(!call.session().is_terminated());

    release.notify_one();
    let answers: Vec<String> = call
        .responses()
        .unwrap()
        .map(|r| r.unwrap().answer)
        .collect()
        .await;
    assert_eq!(answers, vec!["one", "two"]);
    assert!(call.session().is_terminated());
}

#[tokio::test]
async fn test_transport_failure_mid_stream() {
    let transport = MemoryTransport::new(|call: TransportCall| async move {
        reply(&call, "only one");
        call.driver().fail("connection reset");
    });
    let client = Client::builder(transport).build();
    let method = MethodDescriptor::server_stream(SERVICE, "ServerStream");
    let call = client
        .server_stream::<ExampleRequest, ExampleResponse>(&method, &ask("x"))
        .unwrap();

    let mut responses = call.responses().unwrap();
    assert_eq!(responses.next().await.unwrap().unwrap().answer, "only one");
    let err = responses.next().await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert!(responses.next().await.is_none());

    let status = call.status().await;
    assert_eq!(status.code(), Code::Unavailable);
    assert!(call.trailers().await.is_empty());
}

#[tokio::test]
async fn test_peer_error_status() {
    let client = client();
    let method = MethodDescriptor::unary(SERVICE, "Missing");
    let err = client
        .unary::<ExampleRequest, ExampleResponse>(&method, &ask("x"))
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
    assert!(matches!(err, ClientError::Status(_)));
}

#[tokio::test]
async fn test_double_cancel_single_termination() {
    let transport = MemoryTransport::new(|call: TransportCall| async move {
        call.driver().terminated().await;
    });
    let client = Client::builder(transport).build();
    let method = MethodDescriptor::bidi(SERVICE, "Bidi");
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    let call = client
        .bidi_events::<ExampleRequest, ExampleResponse>(&method, CallOptions::new(), |call| {
            call.on_status(move |status, _| sink.lock().push(status.code()));
        })
        .unwrap();

    call.cancel();
    call.cancel();
    let done = call.session().terminated().await;
    assert_eq!(done.status().code(), Code::Cancelled);
    assert_eq!(*statuses.lock(), vec![Code::Cancelled]);
}

#[tokio::test]
async fn test_send_after_complete() {
    let client = client();
    let method = MethodDescriptor::client_stream(SERVICE, "ClientStream");
    let call = client
        .client_stream::<ExampleRequest, ExampleResponse>(&method)
        .unwrap();
    let requests = call.requests();
    requests.complete().await.unwrap();
    let err = requests.send(&ask("late")).await.unwrap_err();
    assert!(matches!(err, ClientError::ChannelClosed));
}

#[tokio::test]
async fn test_facades_agree() {
    let client = client();
    let method = MethodDescriptor::server_stream(SERVICE, "ServerStream");

    let streamed = client
        .server_stream::<ExampleRequest, ExampleResponse>(&method, &ask("x"))
        .unwrap();
    let stream_answers: Vec<String> = streamed
        .responses()
        .unwrap()
        .map(|r| r.unwrap().answer)
        .collect()
        .await;
    let stream_status = streamed.status().await;
    let stream_trailers = streamed.trailers().await;

    let event_answers = Arc::new(Mutex::new(Vec::new()));
    let event_end = Arc::new(Mutex::new(None));
    let answers = event_answers.clone();
    let end = event_end.clone();
    let evented = client
        .server_stream_events::<ExampleRequest, ExampleResponse>(
            &method,
            &ask("x"),
            CallOptions::new(),
            |call| {
                call.on_data(move |m| answers.lock().push(m.answer.clone()));
                call.on_status(move |status, trailers| {
                    *end.lock() = Some((status.code(), trailers.get("x-example").map(String::from)));
                });
            },
        )
        .unwrap();
    evented.session().terminated().await;

    assert_eq!(*event_answers.lock(), stream_answers);
    assert_eq!(
        event_end.lock().clone(),
        Some((
            stream_status.code(),
            stream_trailers.get("x-example").map(String::from)
        ))
    );
}

#[tokio::test]
async fn test_close_terminates_outstanding_calls() {
    let transport = MemoryTransport::new(|call: TransportCall| async move {
        call.driver().terminated().await;
    });
    let client = Client::builder(transport.clone()).build();
    let method = MethodDescriptor::bidi(SERVICE, "Bidi");
    let first = client.bidi::<ExampleRequest, ExampleResponse>(&method).unwrap();
    let second = client.bidi::<ExampleRequest, ExampleResponse>(&method).unwrap();

    client.close();
    for call in [&first, &second] {
        let status = call.status().await;
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "transport closed");
    }
    assert!(transport.is_closed());
    assert_eq!(transport.active_calls(), 0);

    let late = client.bidi::<ExampleRequest, ExampleResponse>(&method).unwrap();
    assert_eq!(late.status().await.code(), Code::Unavailable);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_exceeded() {
    let transport = MemoryTransport::new(|call: TransportCall| async move {
        call.driver().terminated().await;
    });
    let client = Client::builder(transport).build();
    let method = MethodDescriptor::unary(SERVICE, "Unary");
    let options = CallOptions::new().timeout(Duration::from_millis(50));
    let err = client
        .unary_with_options::<ExampleRequest, ExampleResponse>(&method, &ask("slow"), options)
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(err.is_cancelled());
}
