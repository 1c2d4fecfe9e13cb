use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;

/// Runtime parameters for all roles. There are no configuration files - applications create
///  this value in code (or from command line arguments) and pass it to the client / server /
///  responder they start.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// The address a server or responder binds to. Clients bind their socket to this address
    ///  as well, which is usually an ephemeral port (`0.0.0.0:0`).
    pub bind_address: SocketAddr,

    /// The peer a client connects / sends to
    pub remote_address: SocketAddr,

    /// Upper bound for the number of transmissions of a single reliable datagram, including the
    ///  first one
    pub max_attempts: u32,

    /// How long a reliable send waits for an acknowledgment before it retransmits. Exceeding
    ///  this is not an error, it triggers the next attempt.
    pub timeout_per_attempt: Duration,

    /// Probability in `[0, 1]` that the responder drops a packet without acknowledging it. This
    ///  simulates packet loss for exercising the retry logic and should be 0 outside of tests.
    pub p_drop: f64,

    /// Seed for the loss simulator's random number generator, making the sequence of dropped
    ///  packets reproducible. If `None`, the generator is seeded from OS entropy.
    pub loss_seed: Option<u64>,
}

impl ProtocolConfig {
    pub const DEFAULT_STREAM_PORT: u16 = 9000;
    pub const DEFAULT_DATAGRAM_PORT: u16 = 9001;

    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_TIMEOUT_PER_ATTEMPT: Duration = Duration::from_millis(500);

    pub fn new(bind_address: SocketAddr, remote_address: SocketAddr) -> ProtocolConfig {
        ProtocolConfig {
            bind_address,
            remote_address,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            timeout_per_attempt: Self::DEFAULT_TIMEOUT_PER_ATTEMPT,
            p_drop: 0.0,
            loss_seed: None,
        }
    }

    /// Listening on all interfaces at the default stream port, talking to a server on localhost
    pub fn default_stream() -> ProtocolConfig {
        Self::new(
            SocketAddr::from(([0, 0, 0, 0], Self::DEFAULT_STREAM_PORT)),
            SocketAddr::from(([127, 0, 0, 1], Self::DEFAULT_STREAM_PORT)),
        )
    }

    /// Listening on all interfaces at the default datagram port, talking to a responder on localhost
    pub fn default_datagram() -> ProtocolConfig {
        Self::new(
            SocketAddr::from(([0, 0, 0, 0], Self::DEFAULT_DATAGRAM_PORT)),
            SocketAddr::from(([127, 0, 0, 1], Self::DEFAULT_DATAGRAM_PORT)),
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.timeout_per_attempt.is_zero() {
            bail!("timeout_per_attempt must be positive");
        }
        if !(0.0..=1.0).contains(&self.p_drop) {
            bail!("p_drop must be in [0, 1], was {}", self.p_drop);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default_datagram();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.timeout_per_attempt, Duration::from_millis(500));
        assert_eq!(config.p_drop, 0.0);
        assert_eq!(config.remote_address.port(), 9001);
        assert!(config.validate().is_ok());

        assert_eq!(ProtocolConfig::default_stream().bind_address.port(), 9000);
    }

    #[rstest]
    #[case::zero_attempts(0, 500, 0.0, false)]
    #[case::single_attempt(1, 500, 0.0, true)]
    #[case::zero_timeout(3, 0, 0.0, false)]
    #[case::drop_all(3, 500, 1.0, true)]
    #[case::drop_some(3, 500, 0.1, true)]
    #[case::negative_drop(3, 500, -0.1, false)]
    #[case::drop_too_big(3, 500, 1.5, false)]
    #[case::drop_nan(3, 500, f64::NAN, false)]
    fn test_validate(#[case] max_attempts: u32, #[case] timeout_millis: u64, #[case] p_drop: f64, #[case] expected_ok: bool) {
        let mut config = ProtocolConfig::default_datagram();
        config.max_attempts = max_attempts;
        config.timeout_per_attempt = Duration::from_millis(timeout_millis);
        config.p_drop = p_drop;

        assert_eq!(config.validate().is_ok(), expected_ok);
    }
}
