#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Run `fut` to completion on a fresh multi-thread runtime, then give
/// blocking tasks at most `grace` to finish. A task parked on stdin cannot
/// hold the process open past that.
pub fn block_on_with_grace<F: Future>(fut: F, grace: Duration) -> std::io::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let out = rt.block_on(fut);
    debug!(grace_ms = grace.as_millis(), "runtime shutting down");
    rt.shutdown_timeout(grace);
    Ok(out)
}
