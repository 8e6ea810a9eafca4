//! Post-processing of raw learner estimates
//!
//! Turns an [`Estimate`] into the [`PredictedColumn`] a result row carries:
//! confidence clamped to `[0, 1]`, bounds widened to contain the estimate,
//! and a JSON explanation string.

use crate::learner::Estimate;
use crate::models::{ModelArtifact, PredictedColumn, Value};
use serde_json::json;

/// Confidence below this is flagged in the explanation
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct EstimateFormatter;

impl EstimateFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, estimate: Estimate, model: &ModelArtifact) -> PredictedColumn {
        let value = match estimate.value {
            Value::Float(f) if !f.is_finite() => Value::Null,
            other => other,
        };
        let confidence = self.clamp_confidence(estimate.confidence);
        let bounds = self.bounds(&value, estimate.interval);
        let explanation = self.explain(&value, confidence, bounds, &estimate.missing_features, model);

        PredictedColumn {
            column: estimate.column,
            value,
            confidence,
            lower: bounds.map(|b| b.0),
            upper: bounds.map(|b| b.1),
            explanation,
        }
    }

    fn clamp_confidence(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            0.0
        } else {
            raw.clamp(0.0, 1.0)
        }
    }

    /// `min <= estimate <= max`; non-numeric estimates have no bounds
    fn bounds(&self, value: &Value, interval: Option<(f64, f64)>) -> Option<(f64, f64)> {
        let estimate = match value {
            Value::Int(_) | Value::Float(_) => value.as_f64()?,
            _ => return None,
        };
        let (lower, upper) = interval
            .filter(|(l, u)| l.is_finite() && u.is_finite())
            .unwrap_or((estimate, estimate));
        Some((lower.min(upper).min(estimate), upper.max(lower).max(estimate)))
    }

    fn explain(
        &self,
        value: &Value,
        confidence: f64,
        bounds: Option<(f64, f64)>,
        missing: &[String],
        model: &ModelArtifact,
    ) -> String {
        let mut explanation = json!({
            "predicted_value": value,
            "confidence": confidence,
            "confidence_interval": bounds.map(|(l, u)| vec![l, u]),
            "important_missing_information": missing,
            "model": {
                "id": model.id,
                "learner": model.learner,
                "trained_at": model.trained_at,
                "early_stopped": model.early_stopped,
            },
        });
        if confidence < LOW_CONFIDENCE_THRESHOLD {
            explanation["low_confidence"] = json!(true);
        }
        explanation.to_string()
    }
}
