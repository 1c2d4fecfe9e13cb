use std::time::Duration;

use bytes::Bytes;

use crate::datagram::packet;

/// What the owner of a [RetryState] should do next
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RetryAction {
    /// (Re)transmit this packet, then wait for an acknowledgment for the per-attempt timeout
    Transmit(Bytes),
    /// All attempts were used up without an acknowledgment
    GiveUp { attempts: u32 },
    /// The message was acknowledged, there is nothing left to do
    Done,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AckOutcome {
    /// The first acknowledgment for this message
    Accepted,
    /// An acknowledgment for some other (stale or unrelated) sequence number
    Mismatched,
    /// The message was acknowledged before
    Duplicate,
}

/// Bookkeeping for one message in flight. It is driven by two events, "timeout elapsed" and
///  "acknowledgment received", and does no I/O itself.
///
/// Every transmission uses the identical packet, so the receiver can not tell a retransmission
///  from the original.
#[derive(Debug)]
pub struct RetryState {
    sequence: u32,
    packet: Bytes,
    attempts: u32,
    max_attempts: u32,
    timeout_per_attempt: Duration,
    acknowledged: bool,
}

impl RetryState {
    pub fn new(sequence: u32, message: &[u8], max_attempts: u32, timeout_per_attempt: Duration) -> RetryState {
        RetryState {
            sequence,
            packet: packet::encode_request(sequence, message),
            attempts: 0,
            max_attempts,
            timeout_per_attempt,
            acknowledged: false,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Number of transmissions so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn timeout_per_attempt(&self) -> Duration {
        self.timeout_per_attempt
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// The first transmission
    pub fn start(&mut self) -> RetryAction {
        self.next_action()
    }

    pub fn on_timeout(&mut self) -> RetryAction {
        self.next_action()
    }

    pub fn on_ack(&mut self, sequence: u32) -> AckOutcome {
        if sequence != self.sequence {
            return AckOutcome::Mismatched;
        }
        if self.acknowledged {
            return AckOutcome::Duplicate;
        }
        self.acknowledged = true;
        AckOutcome::Accepted
    }

    fn next_action(&mut self) -> RetryAction {
        if self.acknowledged {
            return RetryAction::Done;
        }
        if self.attempts >= self.max_attempts {
            return RetryAction::GiveUp { attempts: self.attempts };
        }

        self.attempts += 1;
        RetryAction::Transmit(self.packet.clone())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn transmitted(action: RetryAction) -> Bytes {
        match action {
            RetryAction::Transmit(packet) => packet,
            other => panic!("expected a transmission, was {:?}", other),
        }
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(10)]
    fn test_exhaustion(#[case] max_attempts: u32) {
        let mut state = RetryState::new(5, b"sensor=27.3", max_attempts, Duration::from_millis(500));

        let first = transmitted(state.start());
        assert_eq!(first.as_ref(), b"\0\0\0\x05sensor=27.3");
        assert_eq!(state.attempts(), 1);

        for attempt in 2..=max_attempts {
            assert_eq!(transmitted(state.on_timeout()), first);
            assert_eq!(state.attempts(), attempt);
        }

        assert_eq!(state.on_timeout(), RetryAction::GiveUp { attempts: max_attempts });
        assert_eq!(state.on_timeout(), RetryAction::GiveUp { attempts: max_attempts });
        assert!(!state.is_acknowledged());
    }

    #[test]
    fn test_zero_attempts() {
        let mut state = RetryState::new(1, b"x", 0, Duration::from_millis(500));
        assert_eq!(state.start(), RetryAction::GiveUp { attempts: 0 });
    }

    #[test]
    fn test_mismatched_ack() {
        let mut state = RetryState::new(5, b"x", 3, Duration::from_millis(500));
        transmitted(state.start());

        assert_eq!(state.on_ack(4), AckOutcome::Mismatched);
        assert_eq!(state.on_ack(6), AckOutcome::Mismatched);
        assert!(!state.is_acknowledged());

        // the retry schedule continues as if nothing had arrived
        transmitted(state.on_timeout());
        assert_eq!(state.attempts(), 2);
    }

    #[test]
    fn test_ack_and_duplicate() {
        let mut state = RetryState::new(5, b"x", 3, Duration::from_millis(500));
        transmitted(state.start());
        transmitted(state.on_timeout());

        assert_eq!(state.on_ack(5), AckOutcome::Accepted);
        assert!(state.is_acknowledged());
        assert_eq!(state.attempts(), 2);

        assert_eq!(state.on_ack(5), AckOutcome::Duplicate);
        assert_eq!(state.on_timeout(), RetryAction::Done);
        assert_eq!(state.attempts(), 2);
    }
}
