//! Bidi Streaming Demo
//!
//! Talks to `Bidi` on the in-process example service. The first call uses
//! the future API and consumes responses by push (`on_message`); the second
//! is event-driven.
//!
//! Usage:
//!   cargo run --bin bidi

use duplex_rpc_client::{CallOptions, Client};
use duplex_rpc_examples::{ExampleRequest, ExampleResponse, ExampleService, bidi_method};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let client = Client::builder(ExampleService::transport()).build();
    let method = bidi_method();

    println!("=== Bidi Streaming Demo ===");
    println!();

    println!("### calling method \"{}\" (future)...", method.method());
    {
        let call = client.bidi::<ExampleRequest, ExampleResponse>(&method)?;

        println!("got response headers: {:?}", call.headers().await);

        call.responses()?
            .on_message(|message: ExampleResponse| println!("got answer: {}", message.answer))?;

        let requests = call.requests();
        println!("sending question...");
        requests.send(&ExampleRequest::new("whats up?")).await?;

        println!("sending another question, then complete...");
        requests.send(&ExampleRequest::new("how are you?")).await?;
        requests.complete().await?;

        println!("got status: {}", call.status().await);
        println!("got trailers: {:?}", call.trailers().await);
    }
    println!();

    println!("### calling method \"{}\" (events)...", method.method());
    {
        let (closed_tx, closed_rx) = oneshot::channel();
        let mut closed_tx = Some(closed_tx);

        let call = client.bidi_events::<ExampleRequest, ExampleResponse>(
            &method,
            CallOptions::new(),
            |call| {
                call.on_metadata(|headers| println!("got response headers: {:?}", headers));
                call.on_data(|message| println!("got answer: {}", message.answer));
                call.on_error(|e| println!("got error: {}", e));
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

        println!("writing question...");
        call.write(&ExampleRequest::new("whats up?"))?;
        println!("writing another question, then end...");
        call.write(&ExampleRequest::new("how are you?"))?;
        call.end()?;

        closed_rx.await?;
    }

    Ok(())
}
