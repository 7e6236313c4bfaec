//! Unary Loop
//!
//! Makes 1000 sequential unary calls against the in-process example service,
//! then closes the transport and shows that later calls fail.
//!
//! Usage:
//!   cargo run --bin unary-loop
//!
//!   # Or choose the number of calls:
//!   cargo run --bin unary-loop -- 5000

use duplex_rpc_client::Client;
use duplex_rpc_examples::{ExampleRequest, ExampleResponse, ExampleService, unary_method};
use std::env;
use std::time::Instant;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let iterations: usize = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 1000,
    };

    println!("=== Unary Loop ===");
    println!("Calls: {}", iterations);
    println!();

    let transport = ExampleService::transport();
    let client = Client::builder(transport.clone()).build();
    let method = unary_method();
    let request = ExampleRequest::new("whats up?");

    let started = Instant::now();
    for _ in 0..iterations {
        client
            .unary::<ExampleRequest, ExampleResponse>(&method, &request)?
            .await?;
    }
    let elapsed = started.elapsed();

    client.close();

    println!("  PASS: {} calls in {:?}", iterations, elapsed);
    println!("  PASS: {} calls still active after close", transport.active_calls());

    let err = client
        .unary::<ExampleRequest, ExampleResponse>(&method, &request)?
        .await
        .expect_err("calls after close must fail");
    println!("  PASS: call after close failed with {}", err.code());

    Ok(())
}
