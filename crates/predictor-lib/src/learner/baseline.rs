//! Baseline learner
//!
//! Numeric targets get an L2-regularized linear regression fitted by
//! gradient descent. Categorical targets get a naive Bayes classifier.
//! One encoder is shared by all targets of a predictor.

use super::features::{lookup, mean_std, Feature, FeatureEncoder, FeatureSpec};
use super::{Estimate, Learner, StopReason, TrainingContext};
use crate::error::LearnerError;
use crate::models::{Dataset, ModelArtifact, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const BASELINE_LEARNER: &str = "baseline";

/// Variance floor for the Gaussian likelihoods
const MIN_VARIANCE: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct BaselineConfig {
    pub max_epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
    /// Training stops once the loss improves by less than this
    pub tolerance: f64,
    pub max_categories: usize,
    /// Half-width of the interval in residual standard deviations
    pub interval_z: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            max_epochs: 300,
            learning_rate: 0.1,
            l2: 1e-3,
            tolerance: 1e-9,
            max_categories: 20,
            interval_z: 1.96,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineModel {
    encoder: FeatureEncoder,
    targets: Vec<TargetModel>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TargetModel {
    Regression {
        column: String,
        weights: Vec<f64>,
        bias: f64,
        y_mean: f64,
        y_std: f64,
        residual_std: f64,
        r2: f64,
        integral: bool,
    },
    Classification {
        column: String,
        classes: Vec<Value>,
        log_priors: Vec<f64>,
        /// `[class][feature]`
        likelihoods: Vec<Vec<Likelihood>>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Likelihood {
    Gaussian { mean: f64, var: f64 },
    /// Log probabilities per category, "other" last
    Categorical { log_probs: Vec<f64> },
}

pub struct BaselineLearner {
    config: BaselineConfig,
}

impl BaselineLearner {
    pub fn new(config: BaselineConfig) -> Self {
        Self { config }
    }

    fn fit_regression(
        &self,
        column: &str,
        x: &[Vec<f64>],
        y: &[f64],
        integral: bool,
        ctx: &TrainingContext,
    ) -> Result<(TargetModel, usize, bool), LearnerError> {
        let n = y.len() as f64;
        let width = x.first().map_or(0, Vec::len);
        let (y_mean, y_std) = mean_std(y);
        let y_std = if y_std > f64::EPSILON { y_std } else { 1.0 };
        let yz: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();

        let mut weights = vec![0.0; width];
        let mut bias = 0.0;
        let mut prev_loss = f64::INFINITY;
        let mut epochs = 0;
        let mut early_stopped = false;

        for _ in 0..self.config.max_epochs {
            match ctx.should_stop() {
                Some(StopReason::Cancelled) => return Err(LearnerError::Cancelled),
                Some(StopReason::Deadline) => {
                    early_stopped = true;
                    break;
                }
                None => {}
            }

            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            let mut loss = 0.0;
            for (row, target) in x.iter().zip(&yz) {
                let err = dot(&weights, row) + bias - target;
                loss += err * err;
                grad_b += err;
                for (g, xi) in grad_w.iter_mut().zip(row) {
                    *g += err * xi;
                }
            }
            loss /= n;

            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= self.config.learning_rate * (g / n + self.config.l2 * *w);
            }
            bias -= self.config.learning_rate * grad_b / n;
            epochs += 1;

            if (prev_loss - loss).abs() < self.config.tolerance {
                break;
            }
            prev_loss = loss;
        }

        let (ss_res, ss_tot) = x.iter().zip(y).fold((0.0, 0.0), |(res, tot), (row, target)| {
            let estimate = (dot(&weights, row) + bias) * y_std + y_mean;
            (res + (target - estimate).powi(2), tot + (target - y_mean).powi(2))
        });
        let r2 = if ss_tot > f64::EPSILON {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        } else if ss_res <= f64::EPSILON {
            1.0
        } else {
            0.0
        };

        debug!(target = %column, epochs, r2, early_stopped, "Fitted regression");
        Ok((
            TargetModel::Regression {
                column: column.to_string(),
                weights,
                bias,
                y_mean,
                y_std,
                residual_std: (ss_res / n).sqrt(),
                r2,
                integral,
            },
            epochs,
            early_stopped,
        ))
    }

    fn fit_classification(
        &self,
        column: &str,
        encoder: &FeatureEncoder,
        features: &[Vec<Feature>],
        labels: &[&Value],
    ) -> TargetModel {
        let mut by_class: BTreeMap<String, (Value, Vec<usize>)> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            by_class
                .entry(label.to_string())
                .or_insert_with(|| ((*label).clone(), Vec::new()))
                .1
                .push(i);
        }

        let n = labels.len() as f64;
        let k = by_class.len() as f64;
        let mut classes = Vec::new();
        let mut log_priors = Vec::new();
        let mut likelihoods = Vec::new();

        for (value, members) in by_class.into_values() {
            log_priors.push(((members.len() as f64 + 1.0) / (n + k)).ln());
            let per_feature = encoder
                .specs()
                .iter()
                .enumerate()
                .map(|(f, spec)| match spec {
                    FeatureSpec::Numeric { .. } => {
                        let values: Vec<f64> = members
                            .iter()
                            .filter_map(|&i| match features[i][f] {
                                Feature::Numeric(v) => v,
                                Feature::Category(_) => None,
                            })
                            .collect();
                        let (mean, std) = mean_std(&values);
                        Likelihood::Gaussian {
                            mean,
                            var: (std * std).max(MIN_VARIANCE),
                        }
                    }
                    FeatureSpec::Categorical { categories, .. } => {
                        let buckets = categories.len() + 1;
                        let mut counts = vec![0usize; buckets];
                        for &i in &members {
                            if let Feature::Category(Some(idx)) = features[i][f] {
                                counts[idx.min(buckets - 1)] += 1;
                            }
                        }
                        let total: usize = counts.iter().sum();
                        Likelihood::Categorical {
                            log_probs: counts
                                .iter()
                                .map(|c| ((*c as f64 + 1.0) / (total as f64 + buckets as f64)).ln())
                                .collect(),
                        }
                    }
                })
                .collect();
            classes.push(value);
            likelihoods.push(per_feature);
        }

        debug!(target = %column, classes = classes.len(), "Fitted naive Bayes");
        TargetModel::Classification {
            column: column.to_string(),
            classes,
            log_priors,
            likelihoods,
        }
    }

    fn estimate(
        &self,
        target: &TargetModel,
        encoder: &FeatureEncoder,
        features: &[Feature],
        vector: &[f64],
    ) -> Estimate {
        let missing = encoder.missing(features);
        let coverage = encoder.coverage(features);

        match target {
            TargetModel::Regression {
                column,
                weights,
                bias,
                y_mean,
                y_std,
                residual_std,
                r2,
                integral,
            } => {
                let raw = (dot(weights, vector) + bias) * y_std + y_mean;
                let half_width = self.config.interval_z * residual_std * (2.0 - coverage);
                let value = if *integral {
                    Value::Int(raw.round() as i64)
                } else {
                    Value::Float(raw)
                };
                Estimate {
                    column: column.clone(),
                    value,
                    confidence: r2 * coverage,
                    interval: Some((raw - half_width, raw + half_width)),
                    missing_features: missing,
                }
            }
            TargetModel::Classification {
                column,
                classes,
                log_priors,
                likelihoods,
            } => {
                let scores: Vec<f64> = log_priors
                    .iter()
                    .zip(likelihoods)
                    .map(|(prior, per_feature)| {
                        prior
                            + per_feature
                                .iter()
                                .zip(features)
                                .map(|(l, f)| log_likelihood(l, f))
                                .sum::<f64>()
                    })
                    .collect();
                let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
                let total: f64 = exp.iter().sum();
                let (best, best_p) = exp
                    .iter()
                    .enumerate()
                    .fold((0, 0.0), |acc, (i, p)| if *p > acc.1 { (i, *p) } else { acc });

                Estimate {
                    column: column.clone(),
                    value: classes.get(best).cloned().unwrap_or(Value::Null),
                    confidence: if total > 0.0 { best_p / total } else { 0.0 },
                    interval: None,
                    missing_features: missing,
                }
            }
        }
    }
}

impl Default for BaselineLearner {
    fn default() -> Self {
        Self::new(BaselineConfig::default())
    }
}

impl Learner for BaselineLearner {
    fn name(&self) -> &str {
        BASELINE_LEARNER
    }

    fn train(
        &self,
        data: &Dataset,
        targets: &[String],
        ctx: &TrainingContext,
    ) -> Result<ModelArtifact, LearnerError> {
        if data.is_empty() {
            return Err(LearnerError::EmptyDataset);
        }
        if let Some(StopReason::Cancelled) = ctx.should_stop() {
            return Err(LearnerError::Cancelled);
        }

        let encoder = FeatureEncoder::fit(data, targets, self.config.max_categories);
        let records = data.records();
        let mut models = Vec::with_capacity(targets.len());
        let mut epochs = 0;
        let mut early_stopped = false;

        for target in targets {
            if data.column_index(target).is_none() {
                return Err(LearnerError::MissingTarget(target.clone()));
            }
            let labelled: Vec<(&Row, &Value)> = records
                .iter()
                .filter_map(|r| lookup(r, target).filter(|v| !v.is_null()).map(|v| (r, v)))
                .collect();
            if labelled.is_empty() {
                return Err(LearnerError::EmptyTarget(target.clone()));
            }

            let features: Vec<Vec<Feature>> =
                labelled.iter().map(|(r, _)| encoder.features(r)).collect();
            let numeric: Option<Vec<f64>> = labelled
                .iter()
                .map(|(_, v)| match v {
                    Value::Bool(_) => None,
                    other => other.as_f64(),
                })
                .collect();

            match numeric {
                Some(y) => {
                    let integral = labelled.iter().all(|(_, v)| match v {
                        Value::Int(_) => true,
                        Value::Text(s) => s.trim().parse::<i64>().is_ok(),
                        _ => false,
                    });
                    let x: Vec<Vec<f64>> = features.iter().map(|f| encoder.vector(f)).collect();
                    let (model, target_epochs, stopped) =
                        self.fit_regression(target, &x, &y, integral, ctx)?;
                    epochs = epochs.max(target_epochs);
                    early_stopped |= stopped;
                    models.push(model);
                }
                None => {
                    if let Some(StopReason::Cancelled) = ctx.should_stop() {
                        return Err(LearnerError::Cancelled);
                    }
                    let labels: Vec<&Value> = labelled.iter().map(|(_, v)| *v).collect();
                    models.push(self.fit_classification(target, &encoder, &features, &labels));
                }
            }
        }

        let payload = serde_json::to_value(BaselineModel {
            encoder,
            targets: models,
        })?;
        let mut artifact = ModelArtifact::new(BASELINE_LEARNER, payload);
        artifact.epochs = epochs;
        artifact.early_stopped = early_stopped;
        Ok(artifact)
    }

    fn predict(&self, model: &ModelArtifact, rows: &[Row]) -> Result<Vec<Vec<Estimate>>, LearnerError> {
        if model.learner != BASELINE_LEARNER {
            return Err(LearnerError::IncompatibleModel {
                expected: BASELINE_LEARNER.to_string(),
                found: model.learner.clone(),
            });
        }
        let decoded: BaselineModel = serde_json::from_value(model.payload.clone())?;

        Ok(rows
            .iter()
            .map(|row| {
                let features = decoded.encoder.features(row);
                let vector = decoded.encoder.vector(&features);
                decoded
                    .targets
                    .iter()
                    .map(|t| self.estimate(t, &decoded.encoder, &features, &vector))
                    .collect()
            })
            .collect())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn log_likelihood(likelihood: &Likelihood, feature: &Feature) -> f64 {
    match (likelihood, feature) {
        (Likelihood::Gaussian { mean, var }, Feature::Numeric(Some(x))) => {
            -0.5 * (2.0 * std::f64::consts::PI * var).ln() - (x - mean).powi(2) / (2.0 * var)
        }
        (Likelihood::Categorical { log_probs }, Feature::Category(Some(idx))) => log_probs
            .get(*idx)
            .or_else(|| log_probs.last())
            .copied()
            .unwrap_or(0.0),
        _ => 0.0,
    }
}
