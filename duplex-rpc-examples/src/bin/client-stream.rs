//! Client Streaming Demo
//!
//! Sends three questions to `ClientStream` on the in-process example service
//! and reads the single answer, first with the future API, then
//! event-driven with a completion callback.
//!
//! Usage:
//!   cargo run --bin client-stream

use duplex_rpc_client::{CallOptions, Client};
use duplex_rpc_examples::{ExampleRequest, ExampleResponse, ExampleService, client_stream_method};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let client = Client::builder(ExampleService::transport()).build();
    let method = client_stream_method();

    println!("=== Client Streaming Demo ===");
    println!();

    println!("### calling method \"{}\" (future)...", method.method());
    {
        let call = client.client_stream::<ExampleRequest, ExampleResponse>(&method)?;
        let requests = call.requests();

        for i in 1..=3 {
            println!("sending message...");
            requests
                .send(&ExampleRequest::new(format!("whats up? #{i}")).with_delay_ms(50))
                .await?;
        }
        println!("done sending");
        requests.complete().await?;

        println!("got response headers: {:?}", call.headers().await);
        println!("got response message: {:?}", call.response().await?);
        println!("got status: {}", call.status().await);
        println!("got trailers: {:?}", call.trailers().await);
    }
    println!();

    println!("### calling method \"{}\" (events)...", method.method());
    {
        let (done_tx, done_rx) = oneshot::channel();

        let call = client.client_stream_events::<ExampleRequest, ExampleResponse>(
            &method,
            CallOptions::new(),
            |call| {
                let registered = call.on_response(move |result| {
                    let _ = done_tx.send(result);
                });
                if let Err(e) = registered {
                    eprintln!("could not register completion callback: {}", e);
                }
            },
        )?;

        for i in 1..=3 {
            println!("writing message...");
            call.write(&ExampleRequest::new(format!("whats up? #{i}")))?;
        }
        call.end()?;

        let response = done_rx.await??;
        println!("got response message: {:?}", response.get_ref());
        println!("got trailers: {:?}", response.trailers());
    }

    Ok(())
}
