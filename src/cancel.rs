//! Cancellation helpers built on [`CancellationToken`].

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A child of `parent` that is additionally cancelled once `timeout` elapses.
///
/// The timer task ends as soon as either token fires, so dropping the scope
/// early does not leave a sleeping task behind.
pub fn with_timeout(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => timer.cancel(),
        }
    });
    token
}

/// A token cancelled when either `a` or `b` is.
pub fn either(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
    let token = a.child_token();
    let linked = token.clone();
    let other = b.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = linked.cancelled() => {}
            _ = other.cancelled() => linked.cancel(),
        }
    });
    token
}

/// Cancels the wrapped token when dropped.
pub struct CancelOnDrop(pub CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
