use anyhow::bail;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ProtocolConfig;

/// Decides for each received packet whether to pretend it was lost on the network
#[cfg_attr(test, mockall::automock)]
pub trait DropDecision: Send {
    fn should_drop(&mut self) -> bool;
}

/// Drops packets at random with probability `p_drop`, simulating a lossy network to exercise
///  the sender's retry logic
#[derive(Debug, Clone)]
pub struct LossSimulator {
    p_drop: f64,
    rng: StdRng,
}

impl LossSimulator {
    pub fn new(p_drop: f64) -> anyhow::Result<LossSimulator> {
        Self::with_rng(p_drop, StdRng::from_entropy())
    }

    /// The same seed produces the same sequence of drop decisions
    pub fn seeded(p_drop: f64, seed: u64) -> anyhow::Result<LossSimulator> {
        Self::with_rng(p_drop, StdRng::seed_from_u64(seed))
    }

    pub fn from_config(config: &ProtocolConfig) -> anyhow::Result<LossSimulator> {
        match config.loss_seed {
            Some(seed) => Self::seeded(config.p_drop, seed),
            None => Self::new(config.p_drop),
        }
    }

    fn with_rng(p_drop: f64, rng: StdRng) -> anyhow::Result<LossSimulator> {
        if !(0.0..=1.0).contains(&p_drop) {
            bail!("drop probability must be in [0, 1], was {}", p_drop);
        }
        Ok(LossSimulator { p_drop, rng })
    }

    pub fn p_drop(&self) -> f64 {
        self.p_drop
    }
}

impl DropDecision for LossSimulator {
    fn should_drop(&mut self) -> bool {
        self.rng.gen_bool(self.p_drop)
    }
}
