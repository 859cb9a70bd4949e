//! Connection manager.
//!
//! The manager is a single task that owns all mutable connection state: the
//! current [`ConnectionState`], the transport, the state timer, the
//! acknowledgement tracker and the outbound queue. User commands, transport
//! events, timer expiries and renewal results all arrive on one command
//! channel, so exactly one transition is decided and applied at a time and
//! an event arriving mid-transition waits its turn.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::machine::{self, Action, Input, MachineContext, TimerKind, Timeouts, Transition};
use super::options::ClientOptions;
use super::state::{ConnectionState, ConnectionStateChange, ConnectionStateKind};
use super::timer::CountdownTimer;
use crate::auth::{AuthOptions, AuthRenewal, Credential};
use crate::core::{CONNECTION_FAILED, ConnectionError, ErrorInfo};
use crate::delivery::{AckTracker, Completion, OutboundQueue, PendingMessage};
use crate::protocol::{Action as MessageAction, ConnectionDetails, ProtocolMessage, RecoveryKey};
use crate::retry::{FallbackHosts, RetryState, jitter_coefficient};
use crate::transport::{
    ConnectMode, Transport, TransportEvent, TransportFactory, TransportListener, TransportParams,
    TransportState,
};

/// Work item for the manager task.
pub(crate) enum Command {
    Connect,
    Close,
    Send {
        message: ProtocolMessage,
        completion: Completion,
    },
    Ping {
        reply: oneshot::Sender<Result<Duration, ConnectionError>>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    TimerFired {
        generation: u64,
        kind: TimerKind,
    },
    RenewalFinished {
        generation: u64,
        result: Result<Credential, ErrorInfo>,
    },
    Shutdown,
}

/// Point-in-time view of the connection, published after every command.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    /// Current state.
    pub state: ConnectionStateKind,
    /// Connection id assigned by the server.
    pub id: Option<String>,
    /// Resumption key assigned by the server.
    pub key: Option<String>,
    /// Last inbound connection serial.
    pub serial: Option<u64>,
    /// Serial the next outbound message will carry.
    pub message_serial: u64,
    /// Last error associated with the connection.
    pub error_reason: Option<ErrorInfo>,
    /// Details sent by the server on connect.
    pub details: Option<ConnectionDetails>,
    /// Last serial seen per channel.
    pub channel_serials: BTreeMap<String, String>,
    /// Host of the current or most recent attempt.
    pub host: Option<String>,
    /// Fallback host preferred for non-realtime requests, and until when.
    pub preferred_host: Option<(String, Instant)>,
}

impl ConnectionSnapshot {
    fn initial(message_serial: u64, channel_serials: BTreeMap<String, String>) -> Self {
        Self {
            state: ConnectionStateKind::Initialized,
            id: None,
            key: None,
            serial: None,
            message_serial,
            error_reason: None,
            details: None,
            channel_serials,
            host: None,
            preferred_host: None,
        }
    }
}

struct PendingPing {
    sent_at: Instant,
    reply: oneshot::Sender<Result<Duration, ConnectionError>>,
}

/// Channel ends the public handle keeps.
pub(crate) struct ManagerEndpoints {
    pub commands: mpsc::UnboundedSender<Command>,
    pub snapshot: watch::Receiver<ConnectionSnapshot>,
    pub events: broadcast::Sender<ConnectionStateChange>,
    pub inbound: mpsc::UnboundedReceiver<ProtocolMessage>,
    pub recovered_channel_serials: BTreeMap<String, String>,
}

pub(crate) struct ConnectionManager {
    options: ClientOptions,
    timeouts: Timeouts,
    factory: Arc<dyn TransportFactory>,
    renewal: Option<Arc<dyn AuthRenewal>>,
    credential: Option<Credential>,

    commands: mpsc::UnboundedReceiver<Command>,
    sender: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ConnectionStateChange>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    inbound: mpsc::UnboundedSender<ProtocolMessage>,

    state: ConnectionState,
    error_reason: Option<ErrorInfo>,

    transport: Option<Box<dyn Transport>>,
    transport_generation: u64,
    transport_open: bool,
    resume_offered: bool,

    timer: CountdownTimer,
    renewal_generation: u64,
    renewal_task: Option<JoinHandle<()>>,
    renewal_attempted: bool,

    retry: RetryState,
    hosts: FallbackHosts,
    ttl: Duration,

    id: Option<String>,
    key: Option<String>,
    serial: Option<u64>,
    msg_serial: u64,
    details: Option<ConnectionDetails>,
    recover: Option<RecoveryKey>,
    channel_serials: BTreeMap<String, String>,

    acks: AckTracker,
    queue: OutboundQueue,
    pings: HashMap<String, PendingPing>,
    ping_counter: u64,
}

impl ConnectionManager {
    /// Create a manager for validated `options`.
    pub fn new(
        options: ClientOptions,
        factory: Arc<dyn TransportFactory>,
        auth: AuthOptions,
    ) -> (Self, ManagerEndpoints) {
        let recover = options
            .recover
            .as_deref()
            .and_then(|key| match RecoveryKey::decode(key) {
                Ok(recovery) => Some(recovery),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring recovery key");
                    None
                }
            });
        let msg_serial = recover.as_ref().map_or(0, |recovery| recovery.msg_serial);
        let channel_serials = recover
            .as_ref()
            .map(|recovery| recovery.channel_serials.clone())
            .unwrap_or_default();

        let (sender, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(options.state_event_capacity);
        let (snapshot, snapshot_rx) = watch::channel(ConnectionSnapshot::initial(
            msg_serial,
            channel_serials.clone(),
        ));
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        let endpoints = ManagerEndpoints {
            commands: sender.clone(),
            snapshot: snapshot_rx,
            events: events.clone(),
            inbound: inbound_rx,
            recovered_channel_serials: channel_serials.clone(),
        };

        let manager = Self {
            timeouts: options.timeouts(),
            hosts: FallbackHosts::new(options.default_host.clone(), options.fallback_hosts.clone()),
            ttl: options.connection_state_ttl,
            factory,
            renewal: auth.renewal,
            credential: auth.credential,
            commands,
            sender,
            events,
            snapshot,
            inbound,
            state: ConnectionState::Initialized,
            error_reason: None,
            transport: None,
            transport_generation: 0,
            transport_open: false,
            resume_offered: false,
            timer: CountdownTimer::new(),
            renewal_generation: 0,
            renewal_task: None,
            renewal_attempted: false,
            retry: RetryState::new(),
            id: None,
            key: None,
            serial: None,
            msg_serial,
            details: None,
            recover,
            channel_serials,
            acks: AckTracker::new(msg_serial),
            queue: OutboundQueue::new(),
            pings: HashMap::new(),
            ping_counter: 0,
            options,
        };
        (manager, endpoints)
    }

    /// Process commands until shutdown.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
            self.publish();
        }
        self.shutdown();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect => self.step(Input::Connect),
            Command::Close => self.step(Input::Close),
            Command::Send {
                message,
                completion,
            } => self.send(message, completion),
            Command::Ping { reply } => self.ping(reply),
            Command::Transport { generation, event } => {
                if generation != self.transport_generation {
                    tracing::trace!(generation, "ignoring event from replaced transport");
                    return;
                }
                match event {
                    TransportEvent::StateChanged { state, error } => {
                        tracing::debug!(%state, generation, "transport state changed");
                        self.transport_open = state == TransportState::Connected;
                        self.step(Input::Transport { state, error });
                    }
                    TransportEvent::Message(message) => self.on_message(message),
                }
            }
            Command::TimerFired { generation, kind } => {
                if self.timer.fired(generation) {
                    self.step(Input::TimerExpired(kind));
                }
            }
            Command::RenewalFinished { generation, result } => {
                if generation != self.renewal_generation {
                    return;
                }
                self.renewal_task = None;
                let outcome = match result {
                    Ok(credential) => {
                        tracing::debug!("credential renewed");
                        self.credential = Some(credential);
                        Ok(())
                    }
                    Err(error) => {
                        tracing::warn!(%error, "credential renewal failed");
                        Err(error)
                    }
                };
                self.step(Input::RenewalCompleted(outcome));
            }
            Command::Shutdown => {}
        }
    }

    fn context(&self) -> MachineContext {
        MachineContext {
            now: Instant::now(),
            episode_started: self.retry.episode_started(),
            attempts: self.retry.attempts(),
            ttl: self.ttl,
            timeouts: self.timeouts,
            jitter: jitter_coefficient(),
            renewable: self.renewal.is_some(),
            renewal_attempted: self.renewal_attempted,
            transport_open: self.transport_open,
            fallback_available: self.hosts.has_unused_fallback(),
            resume_offered: self.resume_offered,
            connection_id: self.id.clone(),
        }
    }

    fn step(&mut self, input: Input) {
        let transition = machine::transition(&self.state, &self.context(), input);
        self.apply(transition);
    }

    fn apply(&mut self, transition: Transition) {
        let previous = self.state.kind();
        if let Some(next) = &transition.next {
            self.timer.cancel();
            if is_renewing(&self.state) && !is_renewing(&next.state) {
                self.cancel_renewal();
            }
            self.state = next.state;
        }

        for action in transition.actions {
            self.perform(action);
        }

        let Some(next) = transition.next else {
            return;
        };
        let current = next.state.kind();
        match current {
            ConnectionStateKind::Connected | ConnectionStateKind::Closed => {
                self.error_reason = None;
            }
            ConnectionStateKind::Disconnected
            | ConnectionStateKind::Suspended
            | ConnectionStateKind::Failed => {
                self.error_reason = next.reason.clone();
            }
            _ => {
                if next.reason.is_some() {
                    self.error_reason = next.reason.clone();
                }
            }
        }
        if previous == ConnectionStateKind::Connected && current != ConnectionStateKind::Connected {
            self.fail_pings(current);
        }

        self.publish();
        if previous != current {
            match &next.reason {
                Some(reason) => {
                    tracing::info!(%previous, %current, %reason, "connection state changed")
                }
                None => tracing::info!(%previous, %current, "connection state changed"),
            }
            // No receivers is fine.
            let _ = self.events.send(ConnectionStateChange {
                previous,
                current,
                reason: next.reason,
                retry_in: next.retry_in,
            });
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::StartAttempt => {
                let attempt = self.retry.record_attempt(Instant::now());
                tracing::debug!(attempt, "connection attempt");
            }
            Action::ResetRetry => {
                self.retry.reset();
                self.hosts.reset();
                self.renewal_attempted = false;
            }
            Action::CreateTransport { fallback } => self.create_transport(fallback),
            Action::DestroyTransport => self.destroy_transport(),
            Action::SendClose => {
                if let Some(transport) = &self.transport {
                    if let Err(e) = transport.send(&ProtocolMessage::close()) {
                        tracing::warn!(error = %e, "failed to send close");
                    }
                }
            }
            Action::ArmTimer { kind, after } => {
                let sender = self.sender.clone();
                let generation = self.timer.start(after, move |generation| {
                    let _ = sender.send(Command::TimerFired { generation, kind });
                });
                tracing::debug!(?kind, ?after, generation, "timer armed");
            }
            Action::RenewCredential => self.renew_credential(),
            Action::SetIdentity {
                id,
                key,
                serial,
                details,
                resumed,
            } => {
                self.id = id;
                self.key = key;
                self.serial = if resumed { serial.or(self.serial) } else { serial };
                if let Some(ttl) = details.as_ref().and_then(|d| d.connection_state_ttl) {
                    self.ttl = Duration::from_millis(ttl);
                }
                self.details = details;
                self.recover = None;
                if !resumed {
                    self.channel_serials.clear();
                }
                self.hosts
                    .on_connected(Instant::now(), self.options.fallback_retry_timeout);
            }
            Action::ClearIdentity => {
                self.id = None;
                self.key = None;
                self.serial = None;
                self.details = None;
                self.recover = None;
                self.channel_serials.clear();
                self.ttl = self.options.connection_state_ttl;
            }
            Action::FailPending(error) => {
                let failed = self.acks.fail_all(&error);
                if failed > 0 {
                    tracing::debug!(failed, "failed messages awaiting acknowledgement");
                }
            }
            Action::FailQueued(error) => {
                let failed = self.queue.fail_all(&error);
                if failed > 0 {
                    tracing::debug!(failed, "failed queued messages");
                }
            }
            Action::ResetMessageSerial => {
                self.msg_serial = 0;
                self.acks.reset(0, &ErrorInfo::unable_to_recover());
            }
            Action::ResendPending => {
                if let Some(transport) = &self.transport {
                    for message in self.acks.pending_messages() {
                        if let Err(e) = transport.send(message) {
                            tracing::warn!(serial = ?message.msg_serial, error = %e, "resend failed");
                        }
                    }
                }
            }
            Action::FlushQueue => {
                for entry in self.queue.drain() {
                    self.transmit(entry.message, entry.completion);
                }
            }
        }
    }

    fn create_transport(&mut self, fallback: bool) {
        self.destroy_transport();
        let generation = self.transport_generation;
        let host = self.hosts.next_host(fallback);

        let mut params = TransportParams::new(host.clone(), self.options.port, self.options.tls);
        params.mode = match (&self.key, &self.recover) {
            (Some(key), _) => ConnectMode::Resume {
                key: key.clone(),
                serial: self.serial,
            },
            (None, Some(recovery)) => ConnectMode::Recover {
                key: recovery.connection_key.clone(),
            },
            (None, None) => ConnectMode::Clean,
        };
        params.credential = self.credential.clone();
        self.resume_offered = params.mode != ConnectMode::Clean;

        let sender = self.sender.clone();
        let listener = TransportListener::new(generation, move |generation, event| {
            let _ = sender.send(Command::Transport { generation, event });
        });

        tracing::debug!(host = %host, generation, resume = self.resume_offered, "creating transport");
        match self.factory.create(params, listener) {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "transport creation failed");
                let status = if e.is_fatal() { 400 } else { 503 };
                let error = ErrorInfo::new(
                    CONNECTION_FAILED,
                    status,
                    format!("transport creation failed: {}", e),
                );
                let _ = self.sender.send(Command::Transport {
                    generation,
                    event: TransportEvent::StateChanged {
                        state: TransportState::Closed,
                        error: Some(error),
                    },
                });
            }
        }
    }

    fn destroy_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            tracing::debug!(generation = self.transport_generation, "destroying transport");
            transport.close();
        }
        self.transport_generation += 1;
        self.transport_open = false;
    }

    fn renew_credential(&mut self) {
        self.renewal_attempted = true;
        self.cancel_renewal();
        let generation = self.renewal_generation;

        let sender = self.sender.clone();
        match self.renewal.clone() {
            Some(bridge) => {
                tracing::debug!(generation, "requesting credential renewal");
                self.renewal_task = Some(tokio::spawn(async move {
                    let result = bridge.renew().await;
                    let _ = sender.send(Command::RenewalFinished { generation, result });
                }));
            }
            None => {
                let _ = sender.send(Command::RenewalFinished {
                    generation,
                    result: Err(ErrorInfo::renewal_failed("no renewal bridge configured")),
                });
            }
        }
    }

    /// Drop any renewal in flight; a result it still delivers is stale.
    fn cancel_renewal(&mut self) {
        self.renewal_generation += 1;
        if let Some(task) = self.renewal_task.take() {
            tracing::debug!("abandoning credential renewal");
            task.abort();
        }
    }

    fn send(&mut self, message: ProtocolMessage, completion: Completion) {
        let kind = self.state.kind();
        if kind == ConnectionStateKind::Connected {
            self.transmit(message, completion);
        } else if kind.can_queue() && self.options.queue_messages {
            self.queue.push(message, completion);
        } else {
            let error = match (kind, &self.error_reason) {
                (ConnectionStateKind::Failed, Some(reason)) => reason.clone(),
                _ => kind.send_error(),
            };
            completion.resolve(Err(error));
        }
    }

    fn transmit(&mut self, mut message: ProtocolMessage, completion: Completion) {
        let serial = self.msg_serial;
        message.msg_serial = Some(serial);

        let entry = PendingMessage {
            serial,
            message: message.clone(),
            completion,
        };
        if let Err(e) = self.acks.register(entry) {
            tracing::error!(error = %e, serial, "message serial out of sequence");
            debug_assert!(false, "message serial out of sequence: {}", e);
            return;
        }
        self.msg_serial += 1;

        match &self.transport {
            Some(transport) => {
                if let Err(e) = transport.send(&message) {
                    tracing::warn!(serial, error = %e, "send failed, message stays pending");
                }
            }
            None => {
                tracing::error!(serial, "no transport while connected");
                debug_assert!(false, "no transport while connected");
            }
        }
    }

    fn ping(&mut self, reply: oneshot::Sender<Result<Duration, ConnectionError>>) {
        let kind = self.state.kind();
        let Some(transport) = self.transport.as_ref().filter(|_| kind == ConnectionStateKind::Connected)
        else {
            let _ = reply.send(Err(ConnectionError::InvalidState(kind)));
            return;
        };

        self.pings.retain(|_, ping| !ping.reply.is_closed());
        self.ping_counter += 1;
        let id = format!("ping-{}", self.ping_counter);
        match transport.send(&ProtocolMessage::heartbeat(id.clone())) {
            Ok(()) => {
                self.pings.insert(
                    id,
                    PendingPing {
                        sent_at: Instant::now(),
                        reply,
                    },
                );
            }
            Err(e) => {
                let _ = reply.send(Err(ConnectionError::Transport(e)));
            }
        }
    }

    fn fail_pings(&mut self, state: ConnectionStateKind) {
        for (_, ping) in self.pings.drain() {
            let _ = ping.reply.send(Err(ConnectionError::InvalidState(state)));
        }
    }

    fn on_message(&mut self, message: ProtocolMessage) {
        tracing::trace!(action = ?message.action, serial = ?message.connection_serial, "inbound message");
        if let Some(serial) = message.connection_serial {
            self.serial = Some(serial);
        }

        match message.action {
            MessageAction::Heartbeat => {
                let ping = message.id.as_ref().and_then(|id| self.pings.remove(id));
                if let Some(ping) = ping {
                    let _ = ping.reply.send(Ok(ping.sent_at.elapsed()));
                }
            }
            MessageAction::Ack | MessageAction::Nack => self.on_confirmation(message),
            MessageAction::Connected | MessageAction::Disconnected | MessageAction::Closed => {
                self.step(Input::Protocol(message));
            }
            MessageAction::Error if message.is_connection_scoped() => {
                self.step(Input::Protocol(message));
            }
            _ => {
                if let (Some(channel), Some(serial)) = (&message.channel, &message.channel_serial) {
                    self.channel_serials.insert(channel.clone(), serial.clone());
                }
                let _ = self.inbound.send(message);
            }
        }
    }

    fn on_confirmation(&mut self, message: ProtocolMessage) {
        let Some(serial) = message.msg_serial else {
            tracing::warn!(action = ?message.action, "confirmation without message serial");
            return;
        };
        let count = message.count.unwrap_or(1);
        let result = match message.action {
            MessageAction::Nack => {
                let error = message.error.unwrap_or_else(|| {
                    ErrorInfo::new(crate::core::INTERNAL_ERROR, 500, "message rejected")
                });
                self.acks.on_nack(serial, count, error)
            }
            _ => self.acks.on_ack(serial, count),
        };
        match result {
            Ok(resolved) => tracing::trace!(serial, count, resolved, "confirmation applied"),
            Err(e) => {
                tracing::error!(error = %e, serial, count, "invalid confirmation");
                debug_assert!(false, "invalid confirmation: {}", e);
            }
        }
    }

    fn publish(&self) {
        let snapshot = ConnectionSnapshot {
            state: self.state.kind(),
            id: self.id.clone(),
            key: self.key.clone(),
            serial: self.serial,
            message_serial: self.msg_serial,
            error_reason: self.error_reason.clone(),
            details: self.details.clone(),
            channel_serials: self.channel_serials.clone(),
            host: self.hosts.current().map(str::to_string),
            preferred_host: self
                .hosts
                .preferred(Instant::now())
                .map(|(host, until)| (host.to_string(), until)),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn shutdown(&mut self) {
        tracing::debug!("connection manager shutting down");
        self.timer.cancel();
        self.cancel_renewal();
        self.destroy_transport();
        let closed = ErrorInfo::closed();
        self.acks.fail_all(&ErrorInfo::not_acknowledged(&closed));
        self.queue.fail_all(&closed);
        self.fail_pings(ConnectionStateKind::Closed);
    }
}

fn is_renewing(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Connecting { renewing: true, .. })
}
