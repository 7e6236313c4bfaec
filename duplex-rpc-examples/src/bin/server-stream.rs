//! Server Streaming Demo
//!
//! Calls `ServerStream` on the in-process example service twice: once with
//! the future/stream API, once event-driven. A third call asks the service
//! to fail after its first message.
//!
//! Usage:
//!   cargo run --bin server-stream

use duplex_rpc_client::{CallOptions, Client};
use duplex_rpc_examples::{
    ExampleRequest, ExampleResponse, ExampleService, FailRequest, server_stream_method,
};
use futures::StreamExt;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let client = Client::builder(ExampleService::transport()).build();
    let method = server_stream_method();

    println!("=== Server Streaming Demo ===");
    println!();

    println!("### calling method \"{}\" (stream)...", method.method());
    {
        let request = ExampleRequest::new("whats up?").with_delay_ms(50);
        let call = client.server_stream::<ExampleRequest, ExampleResponse>(&method, &request)?;

        println!("got response headers: {:?}", call.headers().await);

        let mut responses = call.responses()?;
        while let Some(response) = responses.next().await {
            println!("got response message: {:?}", response?);
        }

        println!("got status: {}", call.status().await);
        println!("got trailers: {:?}", call.trailers().await);
    }
    println!();

    println!("### calling method \"{}\" (events)...", method.method());
    {
        let request = ExampleRequest::new("whats up?").with_delay_ms(50);
        let (closed_tx, closed_rx) = oneshot::channel();
        let mut closed_tx = Some(closed_tx);

        let _call = client.server_stream_events::<ExampleRequest, ExampleResponse>(
            &method,
            &request,
            CallOptions::new(),
            |call| {
                call.on_metadata(|headers| println!("got response headers: {:?}", headers));
                call.on_data(|message| println!("got response message: {:?}", message));
                call.on_end(|| println!("end of responses"));
                call.on_status(|status, trailers| {
                    println!("got status: {}", status);
                    println!("got trailers: {:?}", trailers);
                });
                call.on_close(move || {
                    if let Some(tx) = closed_tx.take() {
                        let _ = tx.send(());
                    }
                });
            },
        )?;

        closed_rx.await?;
    }
    println!();

    println!("### calling method \"{}\" (failing)...", method.method());
    {
        let request = ExampleRequest::new("fail please")
            .with_failure(FailRequest::MessageThenErrorStatus);
        let call = client.server_stream::<ExampleRequest, ExampleResponse>(&method, &request)?;

        let mut responses = call.responses()?;
        while let Some(response) = responses.next().await {
            match response {
                Ok(message) => println!("got response message: {:?}", message),
                Err(e) => println!("got error: {}", e),
            }
        }
        println!("got status: {}", call.status().await);
    }

    Ok(())
}
