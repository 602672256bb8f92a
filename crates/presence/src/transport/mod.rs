// Broker transport abstraction.
//
// Sessions never touch sockets directly: they receive a `ConnectionFactory`
// and drive the connections it yields. Production uses STOMP over a web
// socket (`stomp_ws`); tests substitute a recording mock.

pub mod stomp_ws;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::future::Future;

use quill_common::protocol::presence::Destination;
use quill_common::protocol::stomp::StompError;

/// Errors surfaced by a transport. Sessions treat all of them as a lost
/// connection; none reach the session's caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out waiting for the broker")]
    Timeout,
    #[error("broker rejected the session: {0}")]
    Broker(String),
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("failed to receive frame: {0}")]
    Receive(String),
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] StompError),
}

/// Broker-assigned handle for one topic subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message delivered on one of the connection's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subscription: SubscriptionId,
    pub body: String,
}

/// Opens broker connections. Injected into sessions so no process-wide
/// client exists.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: PresenceConnection;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// One open broker connection, exclusively owned by a session.
pub trait PresenceConnection: Send + 'static {
    /// Fire-and-forget publish of a JSON body.
    fn publish(
        &mut self,
        destination: Destination,
        body: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(
        &mut self,
        topic: Destination,
    ) -> impl Future<Output = Result<SubscriptionId, TransportError>> + Send;

    fn unsubscribe(
        &mut self,
        subscription: SubscriptionId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound message, or `None` once the connection is gone.
    ///
    /// Must be cancel-safe: sessions race it against their shutdown signal.
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Option<Result<InboundMessage, TransportError>>> + Send;

    /// Deactivate the connection. Errors are swallowed.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
