//! Built-in job handlers
//!
//! Small handlers useful for smoke-testing a deployment: `log` echoes its
//! arguments and `sleep` simulates slow work.

use eyre::WrapErr;
use job_dispatcher::{handler_fn, Registration};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SleepArgs {
    ms: u64,
}

pub fn builtin() -> Vec<Registration> {
    vec![
        Registration::new("log", handler_fn(log_job)),
        Registration::new("sleep", handler_fn(sleep_job)),
    ]
}

async fn log_job(args: String) -> eyre::Result<()> {
    info!(args = %args, "log job");
    Ok(())
}

async fn sleep_job(args: String) -> eyre::Result<()> {
    let SleepArgs { ms } =
        serde_json::from_str(&args).wrap_err("sleep expects {\"ms\": <number>}")?;
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(())
}
