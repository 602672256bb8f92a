// Recording in-memory transport for session and binding tests.

use std::sync::{Arc, Mutex};

use quill_common::protocol::presence::Destination;
use tokio::sync::mpsc;

use super::{ConnectionFactory, InboundMessage, PresenceConnection, SubscriptionId, TransportError};

/// Everything a session asked of the transport, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect,
    Publish { destination: Destination, body: String },
    Subscribe(Destination),
    Unsubscribe(SubscriptionId),
    Close,
}

enum Event {
    Message(InboundMessage),
    Drop,
}

#[derive(Default)]
struct Shared {
    calls: Vec<Call>,
    connections: usize,
    failing_connects: usize,
    failing_joins: usize,
    fail_leave: bool,
    live: Option<mpsc::UnboundedSender<Event>>,
    live_subscription: Option<SubscriptionId>,
}

#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    shared: Arc<Mutex<Shared>>,
}

impl MockFactory {
    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("mock transport lock should not be poisoned")
    }

    /// Refuse the next `count` connection attempts.
    pub(crate) fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// Fail the next `count` join publishes.
    pub(crate) fn fail_next_joins(&self, count: usize) {
        self.lock().failing_joins = count;
    }

    /// Make every leave publish fail.
    pub(crate) fn fail_leave_publish(&self) {
        self.lock().fail_leave = true;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| matches(call)).count()
    }

    pub(crate) fn joins(&self) -> usize {
        self.count(|call| {
            matches!(call, Call::Publish { destination: Destination::Join(_), .. })
        })
    }

    pub(crate) fn leaves(&self) -> usize {
        self.count(|call| {
            matches!(call, Call::Publish { destination: Destination::Leave(_), .. })
        })
    }

    /// Deliver a body on the live connection's subscription.
    pub(crate) fn push(&self, body: &str) {
        let shared = self.lock();
        let (Some(live), Some(subscription)) = (&shared.live, &shared.live_subscription) else {
            panic!("no live subscription to push to");
        };
        let message =
            InboundMessage { subscription: subscription.clone(), body: body.to_string() };
        live.send(Event::Message(message)).expect("live connection should be receiving");
    }

    /// Deliver a body on a subscription the session never made.
    pub(crate) fn push_foreign(&self, body: &str) {
        let shared = self.lock();
        let live = shared.live.as_ref().expect("no live connection");
        let message = InboundMessage {
            subscription: SubscriptionId("someone-else".into()),
            body: body.to_string(),
        };
        live.send(Event::Message(message)).expect("live connection should be receiving");
    }

    /// Simulate the server dropping the socket.
    pub(crate) fn drop_connection(&self) {
        let mut shared = self.lock();
        if let Some(live) = shared.live.take() {
            let _ = live.send(Event::Drop);
        }
        shared.live_subscription = None;
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, TransportError> {
        let mut shared = self.lock();
        shared.calls.push(Call::Connect);
        if shared.failing_connects > 0 {
            shared.failing_connects -= 1;
            return Err(TransportError::Connect("mock refused connection".into()));
        }
        shared.connections += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        shared.live = Some(tx);
        shared.live_subscription = None;
        Ok(MockConnection { shared: Arc::clone(&self.shared), id: shared.connections, events: rx })
    }
}

pub(crate) struct MockConnection {
    shared: Arc<Mutex<Shared>>,
    id: usize,
    events: mpsc::UnboundedReceiver<Event>,
}

impl MockConnection {
    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("mock transport lock should not be poisoned")
    }
}

impl PresenceConnection for MockConnection {
    async fn publish(&mut self, destination: Destination, body: String) -> Result<(), TransportError> {
        let mut shared = self.lock();
        shared.calls.push(Call::Publish { destination, body });
        if shared.failing_joins > 0 && matches!(destination, Destination::Join(_)) {
            shared.failing_joins -= 1;
            return Err(TransportError::Send("mock join failure".into()));
        }
        if shared.fail_leave && matches!(destination, Destination::Leave(_)) {
            return Err(TransportError::Send("mock leave failure".into()));
        }
        Ok(())
    }

    async fn subscribe(&mut self, topic: Destination) -> Result<SubscriptionId, TransportError> {
        let mut shared = self.lock();
        shared.calls.push(Call::Subscribe(topic));
        let subscription = SubscriptionId(format!("mock-{}", self.id));
        shared.live_subscription = Some(subscription.clone());
        Ok(subscription)
    }

    async fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError> {
        self.lock().calls.push(Call::Unsubscribe(subscription));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<InboundMessage, TransportError>> {
        match self.events.recv().await {
            Some(Event::Message(message)) => Some(Ok(message)),
            Some(Event::Drop) | None => None,
        }
    }

    async fn close(&mut self) {
        self.lock().calls.push(Call::Close);
    }
}
