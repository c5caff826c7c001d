//! Dispatch Worker - Entry Point
//!
//! Runs a job dispatcher or performs queue maintenance from the command line.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dispatch_worker::run().await
}
