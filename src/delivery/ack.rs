//! Acknowledgement tracking
//!
//! Outbound messages are keyed by their message serial until the server
//! confirms them with an Ack or Nack covering a contiguous serial range.
//! Confirmations resolve strictly in ascending serial order; a confirmation
//! that starts above the lowest pending serial is buffered until the gap
//! before it has been filled.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::core::{AckError, ConnectionError, ErrorInfo, INTERNAL_ERROR};
use crate::protocol::ProtocolMessage;

/// Single-fire completion for one outbound message.
///
/// Resolving consumes the completion, so an entry can never be resolved
/// twice.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<(), ErrorInfo>>,
}

impl Completion {
    /// Create a completion and the future its caller waits on.
    pub fn new() -> (Self, AckFuture) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, AckFuture { rx })
    }

    /// Resolve with the outcome. The caller may have stopped waiting.
    pub fn resolve(self, outcome: Result<(), ErrorInfo>) {
        let _ = self.tx.send(outcome);
    }
}

/// Future returned to the sender of a message. Completes when the server
/// acknowledges the message, or with the reason it never will.
#[derive(Debug)]
pub struct AckFuture {
    rx: oneshot::Receiver<Result<(), ErrorInfo>>,
}

impl AckFuture {
    /// A future that is already resolved with `error`.
    pub fn failed(error: ErrorInfo) -> Self {
        let (completion, future) = Completion::new();
        completion.resolve(Err(error));
        future
    }
}

impl Future for AckFuture {
    type Output = Result<(), ConnectionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ConnectionError::Protocol(error)),
            Err(_) => Err(ConnectionError::ManagerGone),
        })
    }
}

/// A transmitted message awaiting confirmation.
#[derive(Debug)]
pub struct PendingMessage {
    /// Message serial.
    pub serial: u64,
    /// The message as transmitted (carrying `serial`).
    pub message: ProtocolMessage,
    /// Caller-visible completion.
    pub completion: Completion,
}

/// Outcome carried by a server confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement with the server's reason.
    Nack(ErrorInfo),
}

#[derive(Debug, Clone)]
struct Deferred {
    count: u64,
    outcome: Confirmation,
}

/// Tracks transmitted messages until the server confirms them.
#[derive(Debug, Default)]
pub struct AckTracker {
    /// Pending entries; always the contiguous range `[low, registered_end)`.
    pending: BTreeMap<u64, PendingMessage>,
    /// Out-of-order confirmations keyed by their first serial.
    deferred: BTreeMap<u64, Deferred>,
    /// One past the highest serial registered.
    registered_end: u64,
}

impl AckTracker {
    /// Create a tracker whose first registered serial will be `first_serial`.
    pub fn new(first_serial: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            deferred: BTreeMap::new(),
            registered_end: first_serial,
        }
    }

    /// Number of unresolved entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is awaiting confirmation.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Lowest serial that may still be confirmed.
    fn low_water(&self) -> u64 {
        self.pending
            .keys()
            .next()
            .copied()
            .unwrap_or(self.registered_end)
    }

    /// Register a transmitted message.
    ///
    /// Serials must be registered in order with no gaps. On error the entry
    /// is failed with an internal error and the violation is returned.
    pub fn register(&mut self, entry: PendingMessage) -> Result<(), AckError> {
        let serial = entry.serial;
        let violation = if self.pending.contains_key(&serial) {
            Some(AckError::DuplicateSerial(serial))
        } else if serial < self.registered_end {
            Some(AckError::AlreadyResolved(serial))
        } else if serial > self.registered_end && !self.pending.is_empty() {
            Some(AckError::UnknownSerial(self.registered_end))
        } else {
            None
        };

        if let Some(violation) = violation {
            entry
                .completion
                .resolve(Err(ErrorInfo::new(INTERNAL_ERROR, 500, violation.to_string())));
            return Err(violation);
        }

        self.registered_end = serial + 1;
        self.pending.insert(serial, entry);
        Ok(())
    }

    /// Apply an Ack for `count` serials starting at `serial`.
    pub fn on_ack(&mut self, serial: u64, count: u64) -> Result<usize, AckError> {
        self.confirm(serial, count, Confirmation::Ack)
    }

    /// Apply a Nack for `count` serials starting at `serial`.
    pub fn on_nack(&mut self, serial: u64, count: u64, error: ErrorInfo) -> Result<usize, AckError> {
        self.confirm(serial, count, Confirmation::Nack(error))
    }

    /// Apply a confirmation. Returns the number of entries resolved now (a
    /// buffered confirmation resolves nothing until its gap is filled).
    ///
    /// A range overlapping serials that were already resolved, or already
    /// covered by a buffered confirmation, is rejected as a whole.
    pub fn confirm(
        &mut self,
        serial: u64,
        count: u64,
        outcome: Confirmation,
    ) -> Result<usize, AckError> {
        if count == 0 {
            return Ok(0);
        }
        let end = serial.saturating_add(count);
        let low = self.low_water();

        if serial < low {
            return Err(AckError::AlreadyResolved(serial));
        }
        if end > self.registered_end {
            return Err(AckError::UnknownSerial(end - 1));
        }
        if let Some(overlap) = self.deferred_overlap(serial, end) {
            return Err(AckError::AlreadyResolved(overlap));
        }

        if serial > low {
            tracing::debug!(serial, count, low, "buffering out-of-order confirmation");
            self.deferred.insert(serial, Deferred { count, outcome });
            return Ok(0);
        }

        let mut resolved = self.resolve_range(serial, end, &outcome);
        loop {
            let low = self.low_water();
            let start = match self.deferred.first_key_value() {
                Some((start, _)) if *start == low => *start,
                _ => break,
            };
            if let Some(deferred) = self.deferred.remove(&start) {
                resolved += self.resolve_range(start, start + deferred.count, &deferred.outcome);
            }
        }
        Ok(resolved)
    }

    fn deferred_overlap(&self, start: u64, end: u64) -> Option<u64> {
        self.deferred
            .range(..end)
            .find(|(first, deferred)| **first + deferred.count > start)
            .map(|(first, _)| (*first).max(start))
    }

    fn resolve_range(&mut self, start: u64, end: u64, outcome: &Confirmation) -> usize {
        let mut resolved = 0;
        for serial in start..end {
            if let Some(entry) = self.pending.remove(&serial) {
                let result = match outcome {
                    Confirmation::Ack => Ok(()),
                    Confirmation::Nack(error) => Err(error.clone()),
                };
                entry.completion.resolve(result);
                resolved += 1;
            }
        }
        resolved
    }

    /// Fail every pending entry with `error` and drop buffered confirmations.
    pub fn fail_all(&mut self, error: &ErrorInfo) -> usize {
        let pending = std::mem::take(&mut self.pending);
        self.deferred.clear();
        let count = pending.len();
        for (_, entry) in pending {
            entry.completion.resolve(Err(error.clone()));
        }
        count
    }

    /// Restart serial numbering at `first_serial`. Pending entries must have
    /// been failed first; any that remain are failed with `error`.
    pub fn reset(&mut self, first_serial: u64, error: &ErrorInfo) {
        self.fail_all(error);
        self.registered_end = first_serial;
    }

    /// Pending messages in serial order, for retransmission on resume.
    pub fn pending_messages(&self) -> impl Iterator<Item = &ProtocolMessage> {
        self.pending.values().map(|entry| &entry.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(tracker: &mut AckTracker, serial: u64) -> AckFuture {
        let (completion, future) = Completion::new();
        let mut message = ProtocolMessage::message("ch", Vec::new());
        message.msg_serial = Some(serial);
        tracker
            .register(PendingMessage {
                serial,
                message,
                completion,
            })
            .unwrap();
        future
    }

    fn outcome(future: AckFuture) -> Option<Result<(), ConnectionError>> {
        let mut future = future;
        future.rx.try_recv().ok().map(|received| received.map_err(ConnectionError::Protocol))
    }

    #[test]
    fn test_ack_resolves_range_in_order() {
        let mut tracker = AckTracker::new(0);
        let futures: Vec<_> = (0..3).map(|serial| register(&mut tracker, serial)).collect();

        assert_eq!(tracker.on_ack(0, 2).unwrap(), 2);
        assert_eq!(tracker.len(), 1);

        let mut futures = futures.into_iter();
        assert!(matches!(outcome(futures.next().unwrap()), Some(Ok(()))));
        assert!(matches!(outcome(futures.next().unwrap()), Some(Ok(()))));
        assert!(outcome(futures.next().unwrap()).is_none());
    }

    #[test]
    fn test_nack_fails_with_server_error() {
        let mut tracker = AckTracker::new(5);
        let future = register(&mut tracker, 5);

        let error = ErrorInfo::new(40160, 401, "denied");
        assert_eq!(tracker.on_nack(5, 1, error.clone()).unwrap(), 1);

        match outcome(future) {
            Some(Err(ConnectionError::Protocol(got))) => assert_eq!(got, error),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order_confirmation_waits_for_gap() {
        let mut tracker = AckTracker::new(0);
        let futures: Vec<_> = (0..4).map(|serial| register(&mut tracker, serial)).collect();

        assert_eq!(tracker.on_ack(2, 2).unwrap(), 0);
        assert_eq!(tracker.len(), 4);

        assert_eq!(tracker.on_ack(0, 2).unwrap(), 4);
        assert!(tracker.is_empty());
        for future in futures {
            assert!(matches!(outcome(future), Some(Ok(()))));
        }
    }

    #[test]
    fn test_resolving_twice_is_rejected() {
        let mut tracker = AckTracker::new(0);
        let _a = register(&mut tracker, 0);
        let _b = register(&mut tracker, 1);

        tracker.on_ack(0, 1).unwrap();
        assert_eq!(tracker.on_ack(0, 1), Err(AckError::AlreadyResolved(0)));
        assert_eq!(tracker.on_ack(0, 2), Err(AckError::AlreadyResolved(0)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_overlapping_buffered_confirmation_is_rejected() {
        let mut tracker = AckTracker::new(0);
        let _futures: Vec<_> = (0..4).map(|serial| register(&mut tracker, serial)).collect();

        tracker.on_ack(2, 2).unwrap();
        assert_eq!(tracker.on_ack(3, 1), Err(AckError::AlreadyResolved(3)));
        assert_eq!(tracker.on_ack(0, 3), Err(AckError::AlreadyResolved(2)));
    }

    #[test]
    fn test_unknown_serial_is_rejected() {
        let mut tracker = AckTracker::new(0);
        let _a = register(&mut tracker, 0);
        assert_eq!(tracker.on_ack(0, 2), Err(AckError::UnknownSerial(1)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails_entry() {
        let mut tracker = AckTracker::new(0);
        let _a = register(&mut tracker, 0);

        let (completion, future) = Completion::new();
        let result = tracker.register(PendingMessage {
            serial: 0,
            message: ProtocolMessage::message("ch", Vec::new()),
            completion,
        });
        assert_eq!(result, Err(AckError::DuplicateSerial(0)));
        assert!(matches!(outcome(future), Some(Err(_))));
    }

    #[test]
    fn test_fail_all() {
        let mut tracker = AckTracker::new(0);
        let futures: Vec<_> = (0..3).map(|serial| register(&mut tracker, serial)).collect();
        tracker.on_ack(2, 1).unwrap();

        let error = ErrorInfo::not_acknowledged(&ErrorInfo::closed());
        assert_eq!(tracker.fail_all(&error), 3);
        assert!(tracker.is_empty());

        for future in futures {
            match outcome(future) {
                Some(Err(ConnectionError::Protocol(got))) => assert_eq!(got, error),
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        // Serials continue after the failed ones.
        let _next = register(&mut tracker, 3);
        assert_eq!(tracker.on_ack(3, 1).unwrap(), 1);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut tracker = AckTracker::new(10);
        let _a = register(&mut tracker, 10);

        tracker.reset(0, &ErrorInfo::unable_to_recover());
        assert!(tracker.is_empty());
        let _b = register(&mut tracker, 0);
        assert_eq!(tracker.on_ack(0, 1).unwrap(), 1);
    }

    #[test]
    fn test_pending_messages_in_serial_order() {
        let mut tracker = AckTracker::new(0);
        let _futures: Vec<_> = (0..3).map(|serial| register(&mut tracker, serial)).collect();
        tracker.on_ack(0, 1).unwrap();

        let serials: Vec<_> = tracker
            .pending_messages()
            .map(|message| message.msg_serial.unwrap())
            .collect();
        assert_eq!(serials, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_ack_future_resolution() {
        let (completion, future) = Completion::new();
        completion.resolve(Ok(()));
        assert!(future.await.is_ok());

        let (completion, future) = Completion::new();
        drop(completion);
        assert!(matches!(future.await, Err(ConnectionError::ManagerGone)));

        let error = ErrorInfo::suspended();
        match AckFuture::failed(error.clone()).await {
            Err(ConnectionError::Protocol(got)) => assert_eq!(got, error),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
