// Document presence session.
//
// One session owns one broker connection for one (document, user) pair.
// It subscribes to the document topic, joins, mirrors each broadcast into
// a watch channel, reconnects after a fixed delay when the connection
// drops, and publishes a leave before closing on shutdown.

use std::sync::Arc;
use std::time::Duration;

use quill_common::protocol::presence::{
    decode_server_message, Destination, PresencePayload, ServerMessage,
};
use quill_common::types::{CurrentUser, DocumentId, PresenceUser};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::transport::{ConnectionFactory, PresenceConnection, SubscriptionId, TransportError};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// Inputs incomplete; nothing was started.
    Idle,
    /// Opening the connection.
    Connecting,
    /// Joined and subscribed; broadcasts update the viewer list.
    Active,
    /// Connection lost; a reconnect is scheduled. Viewers are stale.
    Disconnected,
    /// Terminal.
    TornDown,
}

impl PresenceState {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Fixed wait between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { reconnect_delay: DEFAULT_RECONNECT_DELAY }
    }
}

/// The (document, user) pair a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceTarget {
    pub document_id: DocumentId,
    pub user: CurrentUser,
}

impl PresenceTarget {
    /// Both inputs must be present for a session to exist.
    pub fn from_inputs(document_id: Option<DocumentId>, user: Option<CurrentUser>) -> Option<Self> {
        match (document_id, user) {
            (Some(document_id), Some(user)) => Some(Self { document_id, user }),
            _ => None,
        }
    }
}

/// Disposer for a running session.
///
/// `stop` tears the session down and waits for it. Dropping the handle
/// triggers the same teardown without waiting for it to finish.
#[derive(Debug)]
pub struct PresenceHandle {
    session_id: Uuid,
    target: Option<PresenceTarget>,
    viewers: watch::Receiver<Vec<PresenceUser>>,
    state: watch::Receiver<PresenceState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PresenceHandle {
    fn idle(viewers: watch::Receiver<Vec<PresenceUser>>) -> Self {
        let (_, state) = watch::channel(PresenceState::Idle);
        Self { session_id: Uuid::new_v4(), target: None, viewers, state, shutdown: None, task: None }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn target(&self) -> Option<&PresenceTarget> {
        self.target.as_ref()
    }

    /// Receiver for the viewer list; replaced wholesale on every broadcast.
    pub fn viewers(&self) -> watch::Receiver<Vec<PresenceUser>> {
        self.viewers.clone()
    }

    pub fn current_viewers(&self) -> Vec<PresenceUser> {
        self.viewers.borrow().clone()
    }

    pub fn state(&self) -> PresenceState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<PresenceState> {
        self.state.clone()
    }

    /// Tear down: publish leave if connected, unsubscribe, close, and wait
    /// until the session task has exited.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                warn!(session_id = %self.session_id, error = %error, "presence session task failed");
            }
        }
    }
}

/// Start presence for `(document_id, user)`.
///
/// With either input missing the returned handle is idle: no connection is
/// attempted and the viewer list stays empty.
pub fn start<F: ConnectionFactory>(
    factory: Arc<F>,
    options: SessionOptions,
    document_id: Option<DocumentId>,
    user: Option<CurrentUser>,
) -> PresenceHandle {
    let (viewers_tx, viewers_rx) = watch::channel(Vec::new());
    match PresenceTarget::from_inputs(document_id, user) {
        Some(target) => spawn_session(factory, options, target, Arc::new(viewers_tx)),
        None => PresenceHandle::idle(viewers_rx),
    }
}

/// Spawn a session that publishes into an existing viewer channel.
pub(crate) fn spawn_session<F: ConnectionFactory>(
    factory: Arc<F>,
    options: SessionOptions,
    target: PresenceTarget,
    viewers: Arc<watch::Sender<Vec<PresenceUser>>>,
) -> PresenceHandle {
    let session_id = Uuid::new_v4();
    let (state_tx, state_rx) = watch::channel(PresenceState::Connecting);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let viewers_rx = viewers.subscribe();

    let span = info_span!(
        "presence.session",
        %session_id,
        document_id = target.document_id,
        user_id = target.user.id
    );
    let session = Session { factory, options, target: target.clone(), viewers, state: state_tx };
    let task = tokio::spawn(session.run(shutdown_rx).instrument(span));

    PresenceHandle {
        session_id,
        target: Some(target),
        viewers: viewers_rx,
        state: state_rx,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}

/// Replace the viewer list from one topic body. Anything that does not
/// decode as a presence broadcast leaves the list untouched.
pub(crate) fn apply_message(viewers: &watch::Sender<Vec<PresenceUser>>, body: &str) -> bool {
    match decode_server_message(body) {
        Ok(ServerMessage::Presence { users }) => {
            debug!(viewers = users.len(), "presence broadcast received");
            viewers.send_replace(users);
            true
        }
        Err(error) => {
            debug!(error = %error, "ignoring presence message");
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    Shutdown,
    Disconnected,
}

struct Session<F> {
    factory: Arc<F>,
    options: SessionOptions,
    target: PresenceTarget,
    viewers: Arc<watch::Sender<Vec<PresenceUser>>>,
    state: watch::Sender<PresenceState>,
}

impl<F: ConnectionFactory> Session<F> {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let document_id = self.target.document_id;
        let payload = PresencePayload::from(&self.target.user).to_json();
        info!("presence session started");

        // `shutdown` resolves on an explicit stop or when the handle is
        // dropped; every branch that observes it leaves the loop.
        loop {
            self.state.send_replace(PresenceState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.factory.connect() => result,
            };

            match connected {
                Ok(mut connection) => {
                    match join(&mut connection, document_id, &payload).await {
                        Ok(subscription) => {
                            self.state.send_replace(PresenceState::Active);
                            info!("presence joined");
                            let exit = self.pump(&mut connection, &subscription, &mut shutdown).await;
                            if exit == PumpExit::Shutdown {
                                leave(&mut connection, document_id, &payload, Some(subscription))
                                    .await;
                                break;
                            }
                            connection.close().await;
                        }
                        Err(JoinFailure { subscription, error }) => {
                            warn!(error = %error, "presence join failed");
                            if let Some(subscription) = subscription {
                                unsubscribe(&mut connection, subscription).await;
                            }
                            connection.close().await;
                        }
                    }
                }
                Err(error) => warn!(error = %error, "presence connection failed"),
            }

            self.state.send_replace(PresenceState::Disconnected);
            debug!(delay = ?self.options.reconnect_delay, "presence reconnect scheduled");
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.options.reconnect_delay) => {}
            }
        }

        self.state.send_replace(PresenceState::TornDown);
        info!("presence session torn down");
    }

    async fn pump(
        &self,
        connection: &mut F::Connection,
        subscription: &SubscriptionId,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                biased;
                _ = &mut *shutdown => return PumpExit::Shutdown,
                next = connection.next_message() => match next {
                    Some(Ok(message)) if &message.subscription == subscription => {
                        apply_message(&self.viewers, &message.body);
                    }
                    Some(Ok(message)) => {
                        debug!(subscription = %message.subscription, "ignoring message for foreign subscription");
                    }
                    Some(Err(error)) => {
                        warn!(error = %error, "presence connection lost");
                        return PumpExit::Disconnected;
                    }
                    None => {
                        warn!("presence connection closed by server");
                        return PumpExit::Disconnected;
                    }
                },
            }
        }
    }
}

struct JoinFailure {
    /// Set when the topic subscription went out before the failure.
    subscription: Option<SubscriptionId>,
    error: TransportError,
}

/// Subscribe to the topic, then publish the join. The broadcast a join
/// triggers only reaches subscriptions that already exist.
async fn join<C: PresenceConnection>(
    connection: &mut C,
    document_id: DocumentId,
    payload: &str,
) -> Result<SubscriptionId, JoinFailure> {
    let subscription = connection
        .subscribe(Destination::Topic(document_id))
        .await
        .map_err(|error| JoinFailure { subscription: None, error })?;
    match connection.publish(Destination::Join(document_id), payload.to_string()).await {
        Ok(()) => Ok(subscription),
        Err(error) => Err(JoinFailure { subscription: Some(subscription), error }),
    }
}

async fn unsubscribe<C: PresenceConnection>(connection: &mut C, subscription: SubscriptionId) {
    if let Err(error) = connection.unsubscribe(subscription).await {
        debug!(error = %error, "presence unsubscribe not delivered");
    }
}

/// Best-effort leave, then close. Never fails.
async fn leave<C: PresenceConnection>(
    connection: &mut C,
    document_id: DocumentId,
    payload: &str,
    subscription: Option<SubscriptionId>,
) {
    if let Err(error) = connection.publish(Destination::Leave(document_id), payload.to_string()).await
    {
        debug!(error = %error, "presence leave not delivered");
    }
    if let Some(subscription) = subscription {
        unsubscribe(connection, subscription).await;
    }
    connection.close().await;
}
