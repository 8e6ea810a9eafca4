//! Learning capability
//!
//! Training and inference are synchronous and CPU-bound; callers run them
//! on the blocking pool. Long trainings poll [`TrainingContext::should_stop`]
//! so they can be cancelled or finalized at their deadline.

mod baseline;
mod features;

pub use baseline::{BaselineConfig, BaselineLearner, BASELINE_LEARNER};
pub use features::{Feature, FeatureEncoder, FeatureSpec};

use crate::error::LearnerError;
use crate::models::{Dataset, ModelArtifact, Row, Value};
use std::time::Instant;
use tokio::sync::watch;

/// Why a training should stop early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The job was cancelled; no model should be produced
    Cancelled,
    /// The deadline passed; finalize with the current state
    Deadline,
}

/// Cooperative stop signals handed to a training run
#[derive(Debug, Clone, Default)]
pub struct TrainingContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl TrainingContext {
    pub fn new(cancel: watch::Receiver<bool>, deadline: Option<Instant>) -> Self {
        Self {
            cancel: Some(cancel),
            deadline,
        }
    }

    /// No cancellation, no deadline
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancellation wins over the deadline
    pub fn should_stop(&self) -> Option<StopReason> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(StopReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StopReason::Deadline),
            _ => None,
        }
    }
}

/// Estimate for one target column of one row
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub column: String,
    pub value: Value,
    /// Raw confidence; the prediction server clamps it
    pub confidence: f64,
    /// `(lower, upper)` for numeric targets
    pub interval: Option<(f64, f64)>,
    /// Input features the model knows about but the row didn't carry
    pub missing_features: Vec<String>,
}

/// Trains models and predicts with them
pub trait Learner: Send + Sync {
    /// Identifier stored in every artifact this learner produces
    fn name(&self) -> &str;

    fn train(
        &self,
        data: &Dataset,
        targets: &[String],
        ctx: &TrainingContext,
    ) -> Result<ModelArtifact, LearnerError>;

    /// One estimate per target for each row, in row order
    fn predict(&self, model: &ModelArtifact, rows: &[Row]) -> Result<Vec<Vec<Estimate>>, LearnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_wins_over_deadline() {
        let (tx, rx) = watch::channel(false);
        let ctx = TrainingContext::new(rx, Some(Instant::now() - Duration::from_secs(1)));
        assert_eq!(ctx.should_stop(), Some(StopReason::Deadline));

        tx.send(true).unwrap();
        assert_eq!(ctx.should_stop(), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_unbounded_never_stops() {
        let ctx = TrainingContext::unbounded();
        assert_eq!(ctx.should_stop(), None);
        let later = ctx.with_deadline(Instant::now() + Duration::from_secs(60));
        assert_eq!(later.should_stop(), None);
    }
}
