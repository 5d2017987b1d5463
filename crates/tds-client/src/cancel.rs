//! Query cancellation support.
//!
//! The server is cancelled with an out-of-band attention packet. The
//! connection splits its transport into read and write halves, so a
//! [`CancelHandle`] can send the attention while another task is blocked
//! reading the response.
//!
//! ## Example
//!
//! ```rust,ignore
//! let cancel = statement.cancel_handle();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     let _ = cancel.cancel().await;
//! });
//!
//! // Raises `Error::QueryCanceled` once the attention is acknowledged.
//! while statement.advance_row().await? {}
//! ```
//!
//! ## Notes
//!
//! - The handle is cloneable and can be shared across tasks.
//! - Calling `cancel()` is idempotent while one attention is outstanding.
//! - The connection stays usable: the reader drains the response up to the
//!   server's acknowledgement before reporting the cancel.

use tds_codec::BoxTransport;

use crate::error::Result;

/// Handle for cancelling the current request on a connection.
#[derive(Clone)]
pub struct CancelHandle {
    inner: tds_codec::CancelHandle<BoxTransport>,
}

impl CancelHandle {
    pub(crate) fn new(inner: tds_codec::CancelHandle<BoxTransport>) -> Self {
        Self { inner }
    }

    /// Send a cancellation request to the server.
    ///
    /// Returns `false` if no request was outstanding or an attention had
    /// already been sent for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the attention packet cannot be written.
    pub async fn cancel(&self) -> Result<bool> {
        Ok(self.inner.cancel().await?)
    }

    /// Check if a cancellation is waiting for the server's acknowledgement.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.inner.is_cancelling()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("is_cancelling", &self.is_cancelling())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CancelHandle>();
    }
}
