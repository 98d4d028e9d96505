//! Broker session and photo delivery
//!
//! The session runs as a statum state machine inside its own tokio task:
//!
//! ```text
//! Initializing ──connect──► Connected ──shutdown──► Disconnecting ──disconnect──► Closed
//!      │
//!      └── ConnectionError: every later subscribe is answered with NotConnected
//! ```
//!
//! Once connected, a second task owns the `rumqttc` event loop. It decodes
//! every publish on the active topic off the async runtime and posts the
//! result to the display channel:
//!
//! ```text
//! EventLoop ─[Publish]─► on_message ─[DisplayEvent]─► UI thread
//!     ▲                                                   │
//!  AsyncClient ◄──────[SessionCommand]── SessionCommander ┘
//! ```
//!
//! There is no automatic reconnect. A dropped link clears the display and
//! leaves the session in [`ConnectionState::Failed`] until the application
//! is restarted.

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use statum::{machine, state};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinHandle};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::MqttConfig;
use super::error::{ConnectionError, SubscriptionError};
use super::message_decoder::decode_photo_field;
use super::topic_selector::AnimalTopic;
use crate::display::materializer::materialize;
use crate::display::surface::{ClearReason, DisplayEvent};

/// How long teardown waits for the DISCONNECT to be flushed
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Undelivered notices kept while the UI is not draining
const MAX_HELD_NOTICES: usize = 5;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Snapshot of the session for the status line
#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    /// Full topic currently routed to the display
    pub active_topic: Option<String>,
    pub messages_received: usize,
    pub last_activity: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub enum SessionCommand {
    Subscribe(AnimalTopic),
    Shutdown,
}

/// Turns one payload into exactly one display change
///
/// A photo replaces the image. Anything else (no photo, undecodable JSON,
/// broken base64, not an image) clears it.
pub fn on_message(payload: &[u8]) -> DisplayEvent {
    match decode_photo_field(payload) {
        Ok(Some(encoded)) => match materialize(&encoded) {
            Ok(photo) => DisplayEvent::Show(photo),
            Err(e) => DisplayEvent::Clear(ClearReason::Image(e)),
        },
        Ok(None) => DisplayEvent::Clear(ClearReason::NoPhoto),
        Err(e) => DisplayEvent::Clear(ClearReason::Decode(e)),
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    queued: VecDeque<String>,
    in_flight: HashMap<u16, String>,
}

/// Maps SUBACKs back to the topic they answer
///
/// The controller queues a topic right before its SUBSCRIBE request. The event
/// loop sends requests in order, so each `Outgoing::Subscribe(pkid)` takes the
/// oldest queued topic.
#[derive(Debug, Clone, Default)]
struct SubscribeLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl SubscribeLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, topic: String) {
        self.lock().queued.push_back(topic);
    }

    /// Takes back the newest topic when its request never reached the event loop
    fn withdraw_last(&self) {
        self.lock().queued.pop_back();
    }

    fn sent(&self, pkid: u16) -> Option<String> {
        let mut state = self.lock();
        let topic = state.queued.pop_front()?;
        state.in_flight.insert(pkid, topic.clone());
        Some(topic)
    }

    fn acknowledged(&self, pkid: u16) -> Option<String> {
        self.lock().in_flight.remove(&pkid)
    }
}

/// Hands display events to the UI without ever blocking the event loop
///
/// While the display channel is full, events are held back. A newer photo or
/// clear replaces an older held one, so at most one image waits here.
struct DisplayOutbox {
    display_tx: mpsc::Sender<DisplayEvent>,
    held: VecDeque<DisplayEvent>,
    closed: bool,
}

impl DisplayOutbox {
    fn new(display_tx: mpsc::Sender<DisplayEvent>) -> Self {
        Self {
            display_tx,
            held: VecDeque::new(),
            closed: false,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn has_held(&self) -> bool {
        !self.held.is_empty()
    }

    fn post(&mut self, event: DisplayEvent) {
        if self.closed {
            trace!("Display closed, discarding event");
            return;
        }
        if self.has_held() {
            self.hold(event);
            return;
        }
        match self.display_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!("Display channel full, holding events");
                self.hold(event);
            }
            Err(TrySendError::Closed(_)) => self.close(),
        }
    }

    fn hold(&mut self, event: DisplayEvent) {
        if event.is_notice() {
            let notices = self.held.iter().filter(|held| held.is_notice()).count();
            if notices >= MAX_HELD_NOTICES {
                if let Some(oldest) = self.held.iter().position(DisplayEvent::is_notice) {
                    self.held.remove(oldest);
                }
            }
        } else {
            self.held.retain(DisplayEvent::is_notice);
        }
        self.held.push_back(event);
    }

    /// Sends the oldest held event into `permit`, then as many as fit
    fn deliver(&mut self, permit: mpsc::OwnedPermit<DisplayEvent>) {
        let Some(event) = self.held.pop_front() else {
            return;
        };
        permit.send(event);

        while let Some(event) = self.held.pop_front() {
            match self.display_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.held.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.close();
                    break;
                }
            }
        }
    }

    /// Waits until every held event is delivered or `cancel` fires
    async fn flush(&mut self, cancel: &CancellationToken) {
        while self.has_held() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.display_tx.clone().reserve_owned() => match permit {
                    Ok(permit) => self.deliver(permit),
                    Err(_) => self.close(),
                },
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            warn!("Display channel closed, discarding further events");
        }
        self.closed = true;
        self.held.clear();
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Initializing, // Client built, nothing sent yet
    Connected,    // CONNACK received, delivery task running
    Disconnecting,
    Closed,
}

#[machine]
pub struct SubscriptionSession<S: SessionState> {
    config: MqttConfig,
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    display_tx: mpsc::Sender<DisplayEvent>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    ledger: SubscribeLedger,
    delivery: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl<S: SessionState> SubscriptionSession<S> {
    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx
            .send_modify(|status| status.connection_state = state);
    }

    fn post(&self, event: DisplayEvent) -> impl Future<Output = ()> + Send + 'static {
        let display_tx = self.display_tx.clone();
        async move {
            if display_tx.send(event).await.is_err() {
                warn!("Display channel closed, dropping event");
            }
        }
    }
}

impl SubscriptionSession<Initializing> {
    pub fn create(
        config: MqttConfig,
        display_tx: mpsc::Sender<DisplayEvent>,
        status_tx: Arc<watch::Sender<SessionStatus>>,
    ) -> Self {
        let client_id = config.generate_client_id();
        info!("Creating MQTT session {} for {}", client_id, config.broker());

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true)
            .set_max_packet_size(config.max_packet_size, config.max_packet_size);

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);

        Self::new(
            config,
            client,
            Some(eventloop),
            display_tx,
            status_tx,
            SubscribeLedger::default(),
            None,                     // delivery
            CancellationToken::new(), // cancel
        )
    }

    /// Waits for CONNACK within the configured timeout, then starts delivery
    pub async fn connect(mut self) -> Result<SubscriptionSession<Connected>, ConnectionError> {
        let broker = self.config.broker();
        let connect_timeout = self.config.connect_timeout();
        info!("Connecting to broker {}", broker);
        self.set_state(ConnectionState::Connecting);

        let Some(mut eventloop) = self.eventloop.take() else {
            return Err(ConnectionError::Lost("event loop already consumed".to_string()));
        };

        let handshake = match timeout(connect_timeout, await_connack(&mut eventloop, &broker)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(connect_timeout)),
        };

        if let Err(e) = handshake {
            error!("Connecting to {} failed: {}", broker, e);
            self.status_tx.send_modify(|status| {
                status.connection_state = ConnectionState::Failed;
                status.last_error = Some(e.to_string());
            });
            return Err(e);
        }

        info!("Connected to broker {}", broker);
        self.status_tx.send_modify(|status| {
            status.connection_state = ConnectionState::Connected;
            status.last_activity = Some(Local::now());
            status.last_error = None;
        });
        self.post(DisplayEvent::info(format!("Connected to broker {}", broker)))
            .await;

        self.delivery = Some(tokio::spawn(deliver_messages(
            eventloop,
            DisplayOutbox::new(self.display_tx.clone()),
            self.status_tx.clone(),
            self.ledger.clone(),
            self.cancel.clone(),
        )));

        Ok(self.transition())
    }
}

impl SubscriptionSession<Connected> {
    /// Routes `topic` to the display, replacing the previous subscription
    ///
    /// The previous topic is unsubscribed explicitly. Confirmation arrives
    /// asynchronously with the SUBACK.
    pub async fn subscribe(&mut self, topic: AnimalTopic) -> Result<(), SubscriptionError> {
        let previous = {
            let status = self.status_tx.borrow();
            if status.connection_state != ConnectionState::Connected {
                return Err(SubscriptionError::NotConnected);
            }
            status.active_topic.clone()
        };

        let full_topic = topic.full_topic();
        let wait = self.config.subscribe_timeout();

        // Switch routing first so late publishes of the old topic are dropped
        self.status_tx
            .send_modify(|status| status.active_topic = Some(full_topic.clone()));

        if let Some(previous) = previous.filter(|previous| *previous != full_topic) {
            info!("Unsubscribing from {}", previous);
            match timeout(wait, self.client.unsubscribe(previous.clone())).await {
                Ok(Ok(())) => debug!("Unsubscribe request for {} queued", previous),
                Ok(Err(e)) => warn!("Unsubscribing from {} failed: {}", previous, e),
                Err(_) => warn!("Unsubscribing from {} timed out", previous),
            }
        }

        info!("Subscribing to {}", full_topic);
        self.ledger.queue(full_topic.clone());
        let result = match timeout(
            wait,
            self.client.subscribe(full_topic.clone(), QoS::AtLeastOnce),
        )
        .await
        {
            Ok(result) => result.map_err(SubscriptionError::from),
            Err(_) => Err(SubscriptionError::Timeout {
                topic: full_topic,
                timeout: wait,
            }),
        };

        if result.is_err() {
            self.ledger.withdraw_last();
            self.status_tx.send_modify(|status| status.active_topic = None);
        }
        result
    }

    /// Processes commands until shutdown is requested or every sender is gone
    pub async fn run_until_shutdown(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> SubscriptionSession<Disconnecting> {
        info!("Session ready for commands");

        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Subscribe(topic) => {
                    if let Err(e) = self.subscribe(topic).await {
                        error!("Subscribing to {} failed: {}", topic, e);
                        self.post(DisplayEvent::Clear(ClearReason::Subscription(e)))
                            .await;
                    }
                }
                SessionCommand::Shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.transition()
    }
}

impl SubscriptionSession<Disconnecting> {
    /// Sends DISCONNECT and stops the delivery task
    pub async fn disconnect(mut self) -> SubscriptionSession<Closed> {
        let was_connected = self.status().connection_state == ConnectionState::Connected;

        // Marked first so the delivery task does not report the closing link as lost
        self.status_tx.send_modify(|status| {
            status.connection_state = ConnectionState::Disconnected;
            status.active_topic = None;
        });

        if was_connected {
            match timeout(DISCONNECT_GRACE, self.client.disconnect()).await {
                Ok(Ok(())) => debug!("Disconnect request queued"),
                Ok(Err(e)) => warn!("Disconnect request failed: {}", e),
                Err(_) => warn!("Disconnect request timed out"),
            }
        }

        if let Some(mut delivery) = self.delivery.take() {
            if timeout(DISCONNECT_GRACE, &mut delivery).await.is_err() {
                warn!("Delivery task did not stop in time, cancelling");
                self.cancel.cancel();
                if let Err(e) = delivery.await {
                    error!("Delivery task failed: {}", e);
                }
            }
        }

        info!("Session closed");
        self.transition()
    }
}

impl SubscriptionSession<Closed> {}

async fn await_connack(eventloop: &mut EventLoop, broker: &str) -> Result<(), ConnectionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ConnectionError::Refused(format!("{:?}", ack.code)))
                };
            }
            Ok(event) => trace!("Waiting for CONNACK: {:?}", event),
            Err(e) => {
                return Err(ConnectionError::Unreachable {
                    broker: broker.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn is_active_topic(status_tx: &watch::Sender<SessionStatus>, topic: &str) -> bool {
    status_tx.borrow().active_topic.as_deref() == Some(topic)
}

async fn deliver_messages(
    mut eventloop: EventLoop,
    mut outbox: DisplayOutbox,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    ledger: SubscribeLedger,
    cancel: CancellationToken,
) {
    info!("Message delivery started");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Message delivery cancelled");
                break;
            }
            permit = outbox.display_tx.clone().reserve_owned(), if outbox.has_held() => {
                match permit {
                    Ok(permit) => outbox.deliver(permit),
                    Err(_) => outbox.close(),
                }
                continue;
            }
            event = eventloop.poll() => event,
        };

        let display_event = match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if !is_active_topic(&status_tx, &publish.topic) {
                    debug!("Ignoring message on inactive topic {}", publish.topic);
                    continue;
                }
                status_tx.send_modify(|status| {
                    status.messages_received += 1;
                    status.last_activity = Some(Local::now());
                });
                debug!(
                    "Message on {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                if outbox.is_closed() {
                    continue;
                }

                let payload = publish.payload;
                match task::spawn_blocking(move || on_message(&payload)).await {
                    Ok(display_event) => display_event,
                    Err(e) => {
                        error!("Decoding task failed: {}", e);
                        continue;
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                match ledger.sent(pkid) {
                    Some(topic) => debug!("SUBSCRIBE {} sent for {}", pkid, topic),
                    None => warn!("SUBSCRIBE {} sent without a queued topic", pkid),
                }
                continue;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let Some(topic) = ledger.acknowledged(ack.pkid) else {
                    warn!("SUBACK for unknown packet id {}", ack.pkid);
                    continue;
                };
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));

                if !is_active_topic(&status_tx, &topic) {
                    debug!(
                        "Ignoring SUBACK for replaced subscription to {} (rejected: {})",
                        topic, rejected
                    );
                    continue;
                }

                if rejected {
                    warn!("Broker rejected subscription to {}", topic);
                    status_tx.send_modify(|status| status.active_topic = None);
                    DisplayEvent::Clear(ClearReason::Subscription(SubscriptionError::Rejected(
                        topic,
                    )))
                } else {
                    info!("Subscribed to {}", topic);
                    DisplayEvent::info(format!("Subscribed to topic: {}", topic))
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnect sent, stopping delivery");
                break;
            }
            Ok(event) => {
                trace!("MQTT event: {:?}", event);
                continue;
            }
            Err(e) => {
                let closing = status_tx.borrow().connection_state == ConnectionState::Disconnected;
                if closing {
                    debug!("Link closed during teardown: {}", e);
                    break;
                }

                error!("Connection lost: {}", e);
                status_tx.send_modify(|status| {
                    status.connection_state = ConnectionState::Failed;
                    status.active_topic = None;
                    status.last_error = Some(e.to_string());
                });
                outbox.post(DisplayEvent::Clear(ClearReason::Connection(
                    ConnectionError::Lost(e.to_string()),
                )));
                break;
            }
        };

        outbox.post(display_event);
    }

    outbox.flush(&cancel).await;
    info!("Message delivery stopped");
}

async fn run_session(
    config: MqttConfig,
    display_tx: mpsc::Sender<DisplayEvent>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    let session = SubscriptionSession::create(config, display_tx.clone(), status_tx);

    match session.connect().await {
        Ok(connected) => {
            let disconnecting = connected.run_until_shutdown(commands).await;
            let _closed = disconnecting.disconnect().await;
        }
        Err(e) => {
            if display_tx
                .send(DisplayEvent::Clear(ClearReason::Connection(e)))
                .await
                .is_err()
            {
                warn!("Display channel closed");
            }

            while let Some(command) = commands.recv().await {
                match command {
                    SessionCommand::Subscribe(topic) => {
                        warn!("Cannot subscribe to {} without a broker session", topic);
                        if display_tx
                            .send(DisplayEvent::Clear(ClearReason::Subscription(
                                SubscriptionError::NotConnected,
                            )))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    SessionCommand::Shutdown => break,
                }
            }
        }
    }
}

/// Cloneable, non-blocking command side of a running session
#[derive(Clone, Debug)]
pub struct SessionCommander {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionCommander {
    /// Queues a subscription; never waits on the broker
    pub fn subscribe(&self, topic: AnimalTopic) -> Result<(), SubscriptionError> {
        debug!("Requesting subscription to {}", topic.full_topic());
        self.command_tx
            .try_send(SessionCommand::Subscribe(topic))
            .map_err(|e| SubscriptionError::ChannelError(e.to_string()))
    }
}

/// Owns the session task from spawn to teardown
pub struct SubscriptionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    status_rx: watch::Receiver<SessionStatus>,
    task_handle: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Starts the session task; connecting happens in the background
    pub fn spawn(config: MqttConfig, display_tx: mpsc::Sender<DisplayEvent>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let task_handle = tokio::spawn(run_session(
            config,
            display_tx,
            Arc::new(status_tx),
            command_rx,
        ));

        SubscriptionHandle {
            command_tx,
            status_rx,
            task_handle: Some(task_handle),
        }
    }

    pub fn commander(&self) -> SessionCommander {
        SessionCommander {
            command_tx: self.command_tx.clone(),
        }
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Disconnects from the broker and waits for the session task
    pub async fn shutdown(&mut self) -> Result<(), SubscriptionError> {
        debug!("Sending shutdown signal to session");
        if self.command_tx.send(SessionCommand::Shutdown).await.is_err() {
            warn!("Session task already terminated");
        }

        if let Some(handle) = self.task_handle.take() {
            handle.await.map_err(|e| {
                SubscriptionError::ChannelError(format!("Session task panicked: {}", e))
            })?;
        }
        Ok(())
    }
}
