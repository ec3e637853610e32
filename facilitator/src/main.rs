//! x402 facilitator HTTP server binary.
//!
//! ```bash
//! # Run with default configuration (config.json if present)
//! cargo run --package facilitator
//!
//! # Run with custom configuration
//! cargo run --package facilitator -- --config /path/to/config.json
//! ```

use std::process;

use facilitator::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
