// STOMP 1.2 over a web socket, using tokio-tungstenite.
//
// The factory performs the CONNECT/CONNECTED handshake and negotiates
// heart-beats; the connection maps logical presence destinations onto
// broker destinations by adding the configured application and topic
// prefixes, and reports a silent server as a timeout.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quill_common::protocol::presence::Destination;
use quill_common::protocol::stomp::{decode_frames, Command, Frame, STOMP_VERSION};
use tokio::net::TcpStream;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::{ConnectionFactory, InboundMessage, PresenceConnection, SubscriptionId, TransportError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompOptions {
    /// Prefix for publish destinations, e.g. `/app`.
    pub app_prefix: String,
    /// Prefix for subscription destinations, e.g. `/topic`.
    pub topic_prefix: String,
    /// Bound on socket open plus the STOMP handshake, each.
    pub connect_timeout: Duration,
    /// Outgoing heart-beat interval; zero disables heart-beats.
    pub heartbeat: Duration,
    /// Heart-beat interval requested from the server; zero disables the
    /// silence check.
    pub incoming_heartbeat: Duration,
}

impl Default for StompOptions {
    fn default() -> Self {
        Self {
            app_prefix: "/app".into(),
            topic_prefix: "/topic".into(),
            connect_timeout: Duration::from_secs(10),
            heartbeat: Duration::from_secs(10),
            incoming_heartbeat: Duration::from_secs(10),
        }
    }
}

impl StompOptions {
    fn publish_destination(&self, destination: Destination) -> String {
        join_prefix(&self.app_prefix, &destination.path())
    }

    fn topic_destination(&self, topic: Destination) -> String {
        join_prefix(&self.topic_prefix, &topic.path())
    }
}

/// Silence longer than this many incoming heart-beat intervals ends the
/// connection.
const SILENCE_FACTOR: u32 = 2;

/// Heart-beat intervals agreed in the CONNECT/CONNECTED exchange. Zero
/// means disabled in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Heartbeats {
    outgoing: Duration,
    incoming: Duration,
}

impl Heartbeats {
    /// STOMP 1.2 rule: each direction runs at the larger of the two
    /// intervals, or not at all if either side sent zero.
    fn negotiate(options: &StompOptions, connected: &Frame) -> Self {
        let (server_sends, server_wants) = parse_heart_beat(connected.get("heart-beat"));
        Self {
            outgoing: agree(options.heartbeat, server_wants),
            incoming: agree(options.incoming_heartbeat, server_sends),
        }
    }
}

/// `cx,cy` in milliseconds; anything missing or unparsable counts as `0,0`.
fn parse_heart_beat(value: Option<&str>) -> (u64, u64) {
    value
        .and_then(|value| value.split_once(','))
        .and_then(|(x, y)| Some((x.trim().parse().ok()?, y.trim().parse().ok()?)))
        .unwrap_or((0, 0))
}

fn agree(client: Duration, server_ms: u64) -> Duration {
    if client.is_zero() || server_ms == 0 {
        Duration::ZERO
    } else {
        client.max(Duration::from_millis(server_ms))
    }
}

fn join_prefix(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("/{path}")
    } else {
        format!("{prefix}/{path}")
    }
}

/// Opens STOMP sessions against a presence endpoint URL
/// (`ws(s)://host/ws/presence[?token=…]`).
#[derive(Debug, Clone)]
pub struct StompWsFactory {
    url: Url,
    options: StompOptions,
}

impl StompWsFactory {
    pub fn new(url: Url, options: StompOptions) -> Self {
        Self { url, options }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn connect_frame(&self) -> Frame {
        let host = self.url.host_str().unwrap_or("localhost").to_string();
        Frame::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header(
                "heart-beat",
                format!(
                    "{},{}",
                    self.options.heartbeat.as_millis(),
                    self.options.incoming_heartbeat.as_millis()
                ),
            )
    }
}

impl ConnectionFactory for StompWsFactory {
    type Connection = StompWsConnection;

    async fn connect(&self) -> Result<StompWsConnection, TransportError> {
        let (mut socket, _) = time::timeout(self.options.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        socket
            .send(WsMessage::Text(self.connect_frame().encode().into()))
            .await
            .map_err(|error| TransportError::Send(error.to_string()))?;

        let connected = time::timeout(self.options.connect_timeout, await_connected(&mut socket))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let heartbeats = Heartbeats::negotiate(&self.options, &connected);
        debug!(
            version = connected.get("version").unwrap_or("unknown"),
            server = connected.get("server").unwrap_or("unknown"),
            outgoing_heartbeat = ?heartbeats.outgoing,
            incoming_heartbeat = ?heartbeats.incoming,
            "STOMP session established"
        );

        Ok(StompWsConnection::new(socket, self.options.clone(), heartbeats))
    }
}

async fn await_connected(socket: &mut Socket) -> Result<Frame, TransportError> {
    while let Some(message) = socket.next().await {
        let message = message.map_err(|error| TransportError::Receive(error.to_string()))?;
        let Some(text) = message_text(&message) else {
            if matches!(message, WsMessage::Close(_)) {
                return Err(TransportError::Closed);
            }
            continue;
        };
        for frame in decode_frames(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => return Err(TransportError::Broker(error_text(&frame))),
                other => debug!(command = %other, "ignoring frame before CONNECTED"),
            }
        }
    }
    Err(TransportError::Closed)
}

fn message_text(message: &WsMessage) -> Option<String> {
    match message {
        WsMessage::Text(text) => Some(text.as_str().to_string()),
        WsMessage::Binary(bytes) => std::str::from_utf8(bytes).ok().map(str::to_string),
        _ => None,
    }
}

fn error_text(frame: &Frame) -> String {
    match frame.get("message") {
        Some(message) if !message.is_empty() => message.to_string(),
        _ if !frame.body.is_empty() => frame.body.clone(),
        _ => "broker sent ERROR".to_string(),
    }
}

enum Wake {
    Incoming(Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>),
    Heartbeat,
    Silent,
}

async fn heartbeat_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn silence(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct StompWsConnection {
    socket: Socket,
    options: StompOptions,
    pending: VecDeque<Frame>,
    heartbeat: Option<Interval>,
    read_timeout: Option<Duration>,
    last_inbound: Instant,
    next_subscription: u64,
}

impl StompWsConnection {
    fn new(socket: Socket, options: StompOptions, heartbeats: Heartbeats) -> Self {
        let outgoing = heartbeats.outgoing;
        let heartbeat = (!outgoing.is_zero()).then(|| {
            let mut interval = time::interval_at(Instant::now() + outgoing, outgoing);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let read_timeout =
            (!heartbeats.incoming.is_zero()).then(|| heartbeats.incoming * SILENCE_FACTOR);
        Self {
            socket,
            options,
            pending: VecDeque::new(),
            heartbeat,
            read_timeout,
            last_inbound: Instant::now(),
            next_subscription: 0,
        }
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.socket
            .send(WsMessage::Text(frame.encode().into()))
            .await
            .map_err(|error| TransportError::Send(error.to_string()))
    }

    fn enqueue(&mut self, text: &str) {
        match decode_frames(text) {
            Ok(frames) => self.pending.extend(frames),
            Err(error) => debug!(error = %error, "dropping undecodable STOMP frame"),
        }
    }
}

impl PresenceConnection for StompWsConnection {
    async fn publish(&mut self, destination: Destination, body: String) -> Result<(), TransportError> {
        let frame = Frame::new(Command::Send)
            .header("destination", self.options.publish_destination(destination))
            .header("content-type", "application/json")
            .with_body(body);
        self.send_frame(frame).await
    }

    async fn subscribe(&mut self, topic: Destination) -> Result<SubscriptionId, TransportError> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        let frame = Frame::new(Command::Subscribe)
            .header("id", id.clone())
            .header("destination", self.options.topic_destination(topic))
            .header("ack", "auto");
        self.send_frame(frame).await?;
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError> {
        self.send_frame(Frame::new(Command::Unsubscribe).header("id", subscription.0)).await
    }

    async fn next_message(&mut self) -> Option<Result<InboundMessage, TransportError>> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                match frame.command {
                    Command::Message => {
                        let Some(subscription) = frame.get("subscription").map(str::to_string)
                        else {
                            debug!("dropping MESSAGE without subscription header");
                            continue;
                        };
                        let message =
                            InboundMessage { subscription: SubscriptionId(subscription), body: frame.body };
                        return Some(Ok(message));
                    }
                    Command::Error => return Some(Err(TransportError::Broker(error_text(&frame)))),
                    other => debug!(command = %other, "ignoring frame"),
                }
            }

            let deadline = self.read_timeout.map(|timeout| self.last_inbound + timeout);
            let wake = tokio::select! {
                incoming = self.socket.next() => Wake::Incoming(incoming),
                () = heartbeat_tick(self.heartbeat.as_mut()) => Wake::Heartbeat,
                () = silence(deadline) => Wake::Silent,
            };

            match wake {
                Wake::Silent => {
                    debug!(timeout = ?self.read_timeout, "no frames or heart-beats from broker");
                    return Some(Err(TransportError::Timeout));
                }
                Wake::Heartbeat => {
                    if let Err(error) = self.socket.send(WsMessage::Text(String::from("\n").into())).await {
                        return Some(Err(TransportError::Send(error.to_string())));
                    }
                }
                Wake::Incoming(None) | Wake::Incoming(Some(Ok(WsMessage::Close(_)))) => return None,
                Wake::Incoming(Some(Err(error))) => {
                    return Some(Err(TransportError::Receive(error.to_string())));
                }
                Wake::Incoming(Some(Ok(message))) => {
                    self.last_inbound = Instant::now();
                    if let Some(text) = message_text(&message) {
                        self.enqueue(&text);
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        let limit = self.options.connect_timeout;
        let closing = async {
            let _ = self.send_frame(Frame::new(Command::Disconnect)).await;
            self.socket.close(None).await
        };
        match time::timeout(limit, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!(error = %error, "web socket close failed"),
            Err(_) => debug!("web socket close timed out"),
        }
    }
}
