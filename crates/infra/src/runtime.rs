//! Bridge from the sync store traits to the async sqlx adapters.

use std::future::Future;

use tokio::runtime::{Handle, RuntimeFlavor};

/// Drive `future` to completion from sync code.
///
/// Works from any thread of a multi-threaded tokio runtime: async workers go
/// through `block_in_place`, `spawn_blocking` threads block directly. A
/// current-thread runtime has no thread to spare, so the call is refused there
/// instead of panicking.
pub(crate) fn block_on<F: Future>(adapter: &str, future: F) -> Result<F::Output, String> {
    let handle = Handle::try_current()
        .map_err(|_| format!("{adapter} must be called within a multi-threaded tokio runtime"))?;
    match handle.runtime_flavor() {
        RuntimeFlavor::MultiThread => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        flavor => Err(format!(
            "{adapter} cannot block on a {flavor:?} tokio runtime; use a multi-threaded runtime"
        )),
    }
}
