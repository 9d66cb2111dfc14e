//! Per-connection protocol detection state.
//!
//! A connection moves through
//! `Accepted → Detecting → Matched → Proxying → Closed`, or ends early in
//! `Rejected` / `TimedOut`. TLS connections go `Matched → Detecting` once more
//! on the decrypted stream.
use std::{fmt, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::core::protocol::{Detection, MatcherSet, ProtocolKind, ProtocolMatcher};

/// Lifecycle of a gateway connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    Accepted,
    Detecting,
    Matched,
    Proxying,
    Rejected,
    TimedOut,
    Closed,
}

impl ConnectionPhase {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Accepted, Detecting)
                | (Detecting, Matched)
                | (Detecting, Rejected)
                | (Detecting, TimedOut)
                | (Matched, Detecting)
                | (Matched, Proxying)
                | (Matched, Rejected)
                | (Matched, TimedOut)
                | (Proxying, Closed)
                | (Rejected, Closed)
                | (TimedOut, Closed)
        )
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionPhase::Accepted => "accepted",
            ConnectionPhase::Detecting => "detecting",
            ConnectionPhase::Matched => "matched",
            ConnectionPhase::Proxying => "proxying",
            ConnectionPhase::Rejected => "rejected",
            ConnectionPhase::TimedOut => "timed_out",
            ConnectionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of evaluating the buffered bytes
#[derive(Debug, Clone)]
pub enum DetectionOutcome {
    Matched(Arc<dyn ProtocolMatcher>),
    Rejected,
    Pending,
}

/// Buffer plus the matchers that have not rejected it yet.
///
/// Bytes are never discarded, so the matched handler can replay everything
/// the peer sent.
#[derive(Debug)]
pub struct DetectionState {
    buffer: BytesMut,
    viable: Vec<Arc<dyn ProtocolMatcher>>,
    max_bytes: usize,
}

impl DetectionState {
    pub fn new(matchers: &MatcherSet, max_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_bytes.min(1024)),
            viable: matchers.matchers().to_vec(),
            max_bytes,
        }
    }

    /// Append a chunk read from the peer
    pub fn offer(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Classify the buffer with every still viable matcher, in priority order.
    ///
    /// The first `Match` wins. Matchers that reject are dropped for the rest of
    /// the connection.
    pub fn evaluate(&mut self) -> DetectionOutcome {
        let buffer = &self.buffer[..];
        let mut matched = None;
        self.viable.retain(|matcher| {
            if matched.is_some() {
                return true;
            }
            match matcher.classify(buffer) {
                Detection::Match => {
                    matched = Some(matcher.clone());
                    true
                }
                Detection::NeedMore => true,
                Detection::Reject => false,
            }
        });

        if let Some(matcher) = matched {
            return DetectionOutcome::Matched(matcher);
        }
        if self.viable.is_empty() || self.buffer.len() >= self.max_bytes {
            return DetectionOutcome::Rejected;
        }
        DetectionOutcome::Pending
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn viable_protocols(&self) -> Vec<ProtocolKind> {
        self.viable.iter().map(|matcher| matcher.kind()).collect()
    }

    /// Hand over the buffered bytes
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Per-socket bookkeeping driven by the detecting gateway
#[derive(Debug)]
pub struct ConnectionState {
    pub id: u64,
    pub started_at: Instant,
    deadline: Instant,
    phase: ConnectionPhase,
}

impl ConnectionState {
    /// A freshly accepted connection whose detection must finish within `detection_timeout`
    pub fn accepted(id: u64, detection_timeout: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            id,
            started_at,
            deadline: started_at + detection_timeout,
            phase: ConnectionPhase::Accepted,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Absolute detection deadline, measured from acceptance
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Move to `next`, ignoring illegal transitions.
    ///
    /// Returns whether the phase changed.
    pub fn transition(&mut self, next: ConnectionPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(
                connection = self.id,
                from = %self.phase,
                to = %next,
                "Ignoring illegal connection phase transition"
            );
            return false;
        }
        tracing::trace!(connection = self.id, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stomp_http() -> MatcherSet {
        MatcherSet::new(&[ProtocolKind::Stomp, ProtocolKind::Http, ProtocolKind::Amqp])
    }

    #[test]
    fn test_chunked_detection_keeps_all_bytes() {
        let mut state = DetectionState::new(&stomp_http(), 4096);

        state.offer(b"CONN");
        assert!(matches!(state.evaluate(), DetectionOutcome::Pending));
        // HTTP is still viable through the CONNECT method
        assert_eq!(
            state.viable_protocols(),
            vec![ProtocolKind::Stomp, ProtocolKind::Http]
        );

        state.offer(b"ECT\nhost:vh\n\n");
        match state.evaluate() {
            DetectionOutcome::Matched(matcher) => {
                assert_eq!(matcher.kind(), ProtocolKind::Stomp)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(state.into_bytes().as_ref(), b"CONNECT\nhost:vh\n\n");
    }

    #[test]
    fn test_all_rejected() {
        let mut state = DetectionState::new(&stomp_http(), 4096);
        state.offer(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(state.evaluate(), DetectionOutcome::Rejected));
        assert!(state.viable_protocols().is_empty());
    }

    #[test]
    fn test_priority_order_decides() {
        let mut state = DetectionState::new(
            &MatcherSet::new(&[ProtocolKind::Amqp, ProtocolKind::Stomp]),
            4096,
        );
        state.offer(b"AMQP\x00\x00\x09\x01");
        match state.evaluate() {
            DetectionOutcome::Matched(matcher) => assert_eq!(matcher.kind(), ProtocolKind::Amqp),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_byte_cap_rejects() {
        let mut state = DetectionState::new(&MatcherSet::new(&[ProtocolKind::Http]), 16);
        state.offer(b"GET /a-very-long-path-without-end");
        assert!(matches!(state.evaluate(), DetectionOutcome::Rejected));
    }

    #[test]
    fn test_empty_matcher_set_rejects() {
        let mut state = DetectionState::new(&MatcherSet::new(&[]), 16);
        state.offer(b"x");
        assert!(matches!(state.evaluate(), DetectionOutcome::Rejected));
    }

    #[test]
    fn test_phase_transitions() {
        use ConnectionPhase::*;
        assert!(Accepted.can_transition_to(Detecting));
        assert!(Matched.can_transition_to(Detecting));
        assert!(Detecting.can_transition_to(TimedOut));
        assert!(!Accepted.can_transition_to(Proxying));
        assert!(!Closed.can_transition_to(Detecting));
        assert!(!Rejected.can_transition_to(Proxying));
    }

    #[tokio::test]
    async fn test_connection_state_deadline_and_transitions() {
        let mut state = ConnectionState::accepted(7, Duration::from_millis(5000));
        assert_eq!(state.deadline() - state.started_at, Duration::from_millis(5000));

        assert!(state.transition(ConnectionPhase::Detecting));
        assert!(!state.transition(ConnectionPhase::Closed));
        assert_eq!(state.phase(), ConnectionPhase::Detecting);
        assert!(state.transition(ConnectionPhase::TimedOut));
        assert!(state.transition(ConnectionPhase::Closed));
        assert_eq!(state.phase(), ConnectionPhase::Closed);
    }
}
