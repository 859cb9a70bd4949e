//! Connection state machine.
//!
//! [`transition`] is a pure function: given the current state, a snapshot of
//! the manager's bookkeeping and one input, it returns the next state (if
//! any) together with the actions the manager must perform. Entry actions of
//! the next state are part of the returned list; the manager disarms the
//! previous state's timer before applying them.

use std::time::Duration;

use tokio::time::Instant;

use super::state::ConnectionState;
use crate::core::{ErrorClass, ErrorInfo, INTERNAL_ERROR};
use crate::protocol::{Action as MessageAction, ConnectionDetails, ProtocolMessage};
use crate::retry::retry_delay;
use crate::transport::TransportState;

/// Timers owned by a state. At most one is armed at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Bounds a connection attempt (and a credential renewal).
    ConnectTimeout,
    /// Next attempt from `Disconnected` or `Suspended`.
    Retry,
    /// Bounds an orderly close.
    ForceClose,
}

/// Timeouts the machine schedules with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Per-attempt timeout.
    pub realtime_request: Duration,
    /// Backoff base while `Disconnected`.
    pub disconnected_retry: Duration,
    /// Fixed retry interval while `Suspended`.
    pub suspended_retry: Duration,
    /// Upper bound on `Closing`.
    pub force_close: Duration,
    /// Smallest backoff delay.
    pub retry_floor: Duration,
    /// Largest backoff delay.
    pub retry_ceiling: Duration,
}

/// One input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// User asked to connect.
    Connect,
    /// User asked to close.
    Close,
    /// Connection-scoped inbound protocol message.
    Protocol(ProtocolMessage),
    /// Lifecycle change of the current transport.
    Transport {
        /// New transport state.
        state: TransportState,
        /// Cause of an abnormal close.
        error: Option<ErrorInfo>,
    },
    /// The current state's timer expired.
    TimerExpired(TimerKind),
    /// The credential renewal bridge finished.
    RenewalCompleted(Result<(), ErrorInfo>),
}

/// Effect the manager performs on behalf of the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Count a connection attempt and start the episode clock.
    StartAttempt,
    /// End the retry episode: attempts, episode clock, host rotation and
    /// the renewal flag.
    ResetRetry,
    /// Replace the transport with a new one.
    CreateTransport {
        /// Use the next fallback host.
        fallback: bool,
    },
    /// Close and drop the transport.
    DestroyTransport,
    /// Send a `Close` message on the transport.
    SendClose,
    /// Arm the state timer.
    ArmTimer {
        /// Timer purpose.
        kind: TimerKind,
        /// Delay until expiry.
        after: Duration,
    },
    /// Ask the renewal bridge for a new credential.
    RenewCredential,
    /// Record the identity assigned by the server.
    SetIdentity {
        /// Connection id.
        id: Option<String>,
        /// Connection key.
        key: Option<String>,
        /// Inbound connection serial.
        serial: Option<u64>,
        /// Server-assigned connection details.
        details: Option<ConnectionDetails>,
        /// Whether the previous session continues.
        resumed: bool,
    },
    /// Forget the connection id, key and serials.
    ClearIdentity,
    /// Fail every message awaiting acknowledgement.
    FailPending(ErrorInfo),
    /// Fail every queued message.
    FailQueued(ErrorInfo),
    /// Restart outbound message serials at zero.
    ResetMessageSerial,
    /// Retransmit messages awaiting acknowledgement.
    ResendPending,
    /// Transmit queued messages in submission order.
    FlushQueue,
}

/// The state the machine moves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Next {
    /// New state.
    pub state: ConnectionState,
    /// Error behind the change.
    pub reason: Option<ErrorInfo>,
    /// Delay of the retry armed on entry, if any.
    pub retry_in: Option<Duration>,
}

/// Result of one machine step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// New state, or `None` to stay put.
    pub next: Option<Next>,
    /// Actions to perform, in order.
    pub actions: Vec<Action>,
}

impl Transition {
    fn none() -> Self {
        Self::default()
    }

    fn to(state: ConnectionState, reason: Option<ErrorInfo>) -> Self {
        Self {
            next: Some(Next {
                state,
                reason,
                retry_in: None,
            }),
            actions: Vec::new(),
        }
    }

    fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    fn retry_in(mut self, delay: Duration) -> Self {
        if let Some(next) = self.next.as_mut() {
            next.retry_in = Some(delay);
        }
        self
    }

    /// Whether the step changes nothing.
    pub fn is_noop(&self) -> bool {
        self.next.is_none() && self.actions.is_empty()
    }
}

/// Manager bookkeeping the machine decides with.
#[derive(Debug, Clone)]
pub struct MachineContext {
    /// Current time.
    pub now: Instant,
    /// Start of the current retry episode.
    pub episode_started: Option<Instant>,
    /// Attempts made in the current episode.
    pub attempts: u32,
    /// Connection-state time-to-live.
    pub ttl: Duration,
    /// Configured timeouts.
    pub timeouts: Timeouts,
    /// Jitter coefficient applied to backoff delays.
    pub jitter: f64,
    /// A renewal bridge is configured.
    pub renewable: bool,
    /// Renewal was already attempted since the last `Connected`.
    pub renewal_attempted: bool,
    /// The transport is open.
    pub transport_open: bool,
    /// An untried fallback host remains.
    pub fallback_available: bool,
    /// The current attempt offered a resume or recover key.
    pub resume_offered: bool,
    /// Connection id from the last `Connected`.
    pub connection_id: Option<String>,
}

/// Decide the next state and actions for `input` in `state`.
pub fn transition(state: &ConnectionState, ctx: &MachineContext, input: Input) -> Transition {
    use ConnectionState as S;

    match (*state, input) {
        (S::Initialized | S::Closed | S::Failed, Input::Connect) => {
            let mut step = connecting(ctx, false);
            step.actions.insert(0, Action::ResetRetry);
            step
        }
        (S::Disconnected { fallback }, Input::Connect) => connecting(ctx, fallback),
        (S::Suspended, Input::Connect) => connecting(ctx, false),
        (_, Input::Connect) => Transition::none(),

        (S::Connecting { .. } | S::Connected { .. }, Input::Close) => closing(ctx),
        (S::Disconnected { .. } | S::Suspended, Input::Close) => closed(),
        (_, Input::Close) => Transition::none(),

        (S::Connecting { renewing: false, .. }, Input::Protocol(message)) => {
            match message.action {
                MessageAction::Connected => connected(ctx, message),
                MessageAction::Error => on_error(ctx, error_of(message)),
                MessageAction::Disconnected | MessageAction::Closed => match message.error {
                    Some(error) => on_error(ctx, error),
                    None => disconnected_or_suspended(ctx, ErrorInfo::disconnected(), false),
                },
                _ => Transition::none(),
            }
        }
        (S::Connecting { renewing: false, .. }, Input::Transport { state, error }) => {
            match (state, error) {
                (TransportState::Closed, Some(error)) => on_error(ctx, error),
                (TransportState::Closed, None) => {
                    disconnected_or_suspended(ctx, ErrorInfo::disconnected(), true)
                }
                _ => Transition::none(),
            }
        }
        (S::Connecting { .. }, Input::TimerExpired(TimerKind::ConnectTimeout)) => {
            disconnected_or_suspended(ctx, ErrorInfo::connection_timed_out(), true)
        }
        (S::Connecting { renewing: true, .. }, Input::RenewalCompleted(result)) => match result {
            Ok(()) => connecting(ctx, false),
            Err(error) => failed(error),
        },

        (S::Connected { .. }, Input::Protocol(message)) => match message.action {
            MessageAction::Error => on_error(ctx, error_of(message)),
            MessageAction::Disconnected => match message.error {
                Some(error) => on_error(ctx, error),
                None => disconnected(ctx, ErrorInfo::disconnected(), false),
            },
            MessageAction::Closed => {
                disconnected(ctx, message.error.unwrap_or_else(ErrorInfo::disconnected), false)
            }
            _ => Transition::none(),
        },
        (S::Connected { .. }, Input::Transport { state: TransportState::Closed, error }) => {
            disconnected(ctx, error.unwrap_or_else(ErrorInfo::disconnected), false)
        }

        (S::Disconnected { fallback }, Input::TimerExpired(TimerKind::Retry)) => {
            connecting(ctx, fallback)
        }
        (S::Suspended, Input::TimerExpired(TimerKind::Retry)) => connecting(ctx, false),

        (S::Closing, Input::Protocol(message)) => match message.action {
            MessageAction::Error => failed(error_of(message)),
            MessageAction::Disconnected => disconnected(
                ctx,
                message.error.unwrap_or_else(ErrorInfo::disconnected),
                false,
            ),
            MessageAction::Closed => closed(),
            _ => Transition::none(),
        },
        (S::Closing, Input::Transport { state: TransportState::Closed, .. }) => closed(),
        (S::Closing, Input::TimerExpired(TimerKind::ForceClose)) => closed(),

        _ => Transition::none(),
    }
}

fn error_of(message: ProtocolMessage) -> ErrorInfo {
    message
        .error
        .unwrap_or_else(|| ErrorInfo::new(INTERNAL_ERROR, 500, "error message without details"))
}

fn on_error(ctx: &MachineContext, error: ErrorInfo) -> Transition {
    match error.class() {
        ErrorClass::CredentialExpiry if ctx.renewable && !ctx.renewal_attempted => {
            renewing(ctx, error)
        }
        ErrorClass::CredentialExpiry | ErrorClass::Fatal => failed(error),
        ErrorClass::Transient => disconnected_or_suspended(ctx, error, true),
    }
}

fn connecting(ctx: &MachineContext, fallback: bool) -> Transition {
    Transition::to(
        ConnectionState::Connecting {
            fallback,
            renewing: false,
        },
        None,
    )
    .then(Action::StartAttempt)
    .then(Action::CreateTransport { fallback })
    .then(Action::ArmTimer {
        kind: TimerKind::ConnectTimeout,
        after: ctx.timeouts.realtime_request,
    })
}

fn renewing(ctx: &MachineContext, error: ErrorInfo) -> Transition {
    Transition::to(
        ConnectionState::Connecting {
            fallback: false,
            renewing: true,
        },
        Some(error),
    )
    .then(Action::DestroyTransport)
    .then(Action::RenewCredential)
    .then(Action::ArmTimer {
        kind: TimerKind::ConnectTimeout,
        after: ctx.timeouts.realtime_request,
    })
}

fn connected(ctx: &MachineContext, message: ProtocolMessage) -> Transition {
    let same_connection = match (&ctx.connection_id, &message.connection_id) {
        (Some(previous), Some(current)) => previous == current,
        _ => true,
    };
    let resumed = ctx.resume_offered && message.error.is_none() && same_connection;

    let key = message.connection_key().map(str::to_string);
    let reason = message.error.clone();
    let mut step = Transition::to(ConnectionState::Connected { resumed }, reason.clone())
        .then(Action::ResetRetry)
        .then(Action::SetIdentity {
            id: message.connection_id,
            key,
            serial: message.connection_serial,
            details: message.connection_details,
            resumed,
        });

    if resumed {
        step = step.then(Action::ResendPending);
    } else {
        let cause = reason.unwrap_or_else(ErrorInfo::unable_to_recover);
        step = step
            .then(Action::FailPending(ErrorInfo::not_acknowledged(&cause)))
            .then(Action::ResetMessageSerial);
    }
    step.then(Action::FlushQueue)
}

fn disconnected_or_suspended(ctx: &MachineContext, reason: ErrorInfo, fallback: bool) -> Transition {
    let ttl_exceeded = ctx
        .episode_started
        .map(|started| ctx.now.saturating_duration_since(started) > ctx.ttl)
        .unwrap_or(false);
    if ttl_exceeded {
        suspended(ctx)
    } else {
        disconnected(ctx, reason, fallback)
    }
}

fn disconnected(ctx: &MachineContext, reason: ErrorInfo, fallback: bool) -> Transition {
    // First loss after being connected, or a fallback host still to try.
    let immediate = ctx.attempts == 0 || (fallback && ctx.fallback_available);
    let delay = if immediate {
        Duration::ZERO
    } else {
        retry_delay(
            ctx.timeouts.disconnected_retry,
            ctx.attempts,
            ctx.jitter,
            ctx.timeouts.retry_floor,
            ctx.timeouts.retry_ceiling,
        )
    };

    Transition::to(ConnectionState::Disconnected { fallback }, Some(reason))
        .retry_in(delay)
        .then(Action::DestroyTransport)
        .then(Action::ArmTimer {
            kind: TimerKind::Retry,
            after: delay,
        })
}

fn suspended(ctx: &MachineContext) -> Transition {
    let reason = ErrorInfo::suspended();
    Transition::to(ConnectionState::Suspended, Some(reason.clone()))
        .retry_in(ctx.timeouts.suspended_retry)
        .then(Action::DestroyTransport)
        .then(Action::FailQueued(reason))
        .then(Action::ArmTimer {
            kind: TimerKind::Retry,
            after: ctx.timeouts.suspended_retry,
        })
}

fn closing(ctx: &MachineContext) -> Transition {
    let step = Transition::to(ConnectionState::Closing, None);
    if ctx.transport_open {
        step.then(Action::SendClose).then(Action::ArmTimer {
            kind: TimerKind::ForceClose,
            after: ctx.timeouts.force_close,
        })
    } else {
        step.then(Action::ArmTimer {
            kind: TimerKind::ForceClose,
            after: Duration::ZERO,
        })
    }
}

fn closed() -> Transition {
    let reason = ErrorInfo::closed();
    Transition::to(ConnectionState::Closed, None)
        .then(Action::DestroyTransport)
        .then(Action::ClearIdentity)
        .then(Action::FailPending(ErrorInfo::not_acknowledged(&reason)))
        .then(Action::FailQueued(reason))
}

fn failed(error: ErrorInfo) -> Transition {
    Transition::to(ConnectionState::Failed, Some(error.clone()))
        .then(Action::DestroyTransport)
        .then(Action::ClearIdentity)
        .then(Action::FailPending(ErrorInfo::not_acknowledged(&error)))
        .then(Action::FailQueued(error))
}
