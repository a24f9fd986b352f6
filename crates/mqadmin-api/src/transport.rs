// Transport contract between an admin session and one broker.
//
// The session layer never sees bytes: a transport moves typed `Request`
// and `Reply` envelopes over whatever channel it wraps. Implementations
// must be usable from a shared reference so the session can hold them
// behind an `Arc`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use secrecy::SecretString;

use crate::error::Error;
use crate::message::{Reply, Request};

/// Duplex admin channel to a single broker.
pub trait Transport: Send + Sync + 'static {
    /// Establish the channel and authenticate. Fails with
    /// [`Error::InvalidLogin`] or [`Error::Forbidden`] when the broker
    /// refuses the credentials.
    fn open<'a>(
        &'a self,
        username: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<(), Error>>;

    /// Close the channel. Closing a transport that is not open succeeds.
    fn close(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Hand one request to the broker.
    fn send(&self, request: Request) -> BoxFuture<'_, Result<(), Error>>;

    /// Wait up to `window` for the next reply. `Ok(None)` means the window
    /// elapsed without traffic.
    ///
    /// Must be cancel-safe: dropping the future before it completes never
    /// loses a reply.
    fn receive(&self, window: Duration) -> BoxFuture<'_, Result<Option<Reply>, Error>>;

    /// Whether `open` has succeeded and `close` has not been called since.
    fn is_open(&self) -> bool;
}
