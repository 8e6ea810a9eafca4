//! Feature encoding for the baseline learner
//!
//! Numeric columns are standardized with the training mean and standard
//! deviation. Other columns are one-hot encoded over their most frequent
//! values; anything outside that set falls into an implicit "other" bucket.

use crate::models::{Dataset, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Encoding of one input column, fitted on training data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSpec {
    Numeric { column: String, mean: f64, std: f64 },
    Categorical { column: String, categories: Vec<String> },
}

impl FeatureSpec {
    pub fn column(&self) -> &str {
        match self {
            FeatureSpec::Numeric { column, .. } | FeatureSpec::Categorical { column, .. } => column,
        }
    }

    /// Width of this feature in the encoded vector
    fn width(&self) -> usize {
        match self {
            FeatureSpec::Numeric { .. } => 1,
            FeatureSpec::Categorical { categories, .. } => categories.len(),
        }
    }
}

/// One encoded input value; `None` when the row didn't carry it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feature {
    /// Standardized value
    Numeric(Option<f64>),
    /// Category index; `categories.len()` is the "other" bucket
    Category(Option<usize>),
}

impl Feature {
    pub fn is_missing(&self) -> bool {
        matches!(self, Feature::Numeric(None) | Feature::Category(None))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureEncoder {
    specs: Vec<FeatureSpec>,
}

impl FeatureEncoder {
    /// Fit an encoding for every column of `data` except `exclude`
    pub fn fit(data: &Dataset, exclude: &[String], max_categories: usize) -> Self {
        let specs = data
            .columns
            .iter()
            .filter(|c| !exclude.iter().any(|e| e.eq_ignore_ascii_case(c)))
            .filter_map(|column| {
                let values: Vec<&Value> = data
                    .column_values(column)?
                    .filter(|v| !v.is_null())
                    .collect();
                fit_column(column, &values, max_categories)
            })
            .collect();
        Self { specs }
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    /// Width of the dense vector produced by [`FeatureEncoder::vector`]
    pub fn width(&self) -> usize {
        self.specs.iter().map(FeatureSpec::width).sum()
    }

    pub fn features(&self, row: &Row) -> Vec<Feature> {
        self.specs
            .iter()
            .map(|spec| {
                let value = lookup(row, spec.column()).filter(|v| !v.is_null());
                match spec {
                    FeatureSpec::Numeric { mean, std, .. } => {
                        Feature::Numeric(value.and_then(Value::as_f64).map(|x| (x - mean) / std))
                    }
                    FeatureSpec::Categorical { categories, .. } => Feature::Category(value.map(|v| {
                        let key = v.to_string();
                        categories
                            .iter()
                            .position(|c| *c == key)
                            .unwrap_or(categories.len())
                    })),
                }
            })
            .collect()
    }

    /// Dense vector; missing numerics sit at the mean (zero after scaling)
    pub fn vector(&self, features: &[Feature]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.width());
        for (spec, feature) in self.specs.iter().zip(features) {
            match (spec, feature) {
                (FeatureSpec::Numeric { .. }, Feature::Numeric(v)) => out.push(v.unwrap_or(0.0)),
                (FeatureSpec::Categorical { categories, .. }, Feature::Category(idx)) => {
                    out.extend((0..categories.len()).map(|i| if *idx == Some(i) { 1.0 } else { 0.0 }));
                }
                _ => out.extend(std::iter::repeat(0.0).take(spec.width())),
            }
        }
        out
    }

    pub fn missing(&self, features: &[Feature]) -> Vec<String> {
        self.specs
            .iter()
            .zip(features)
            .filter(|(_, f)| f.is_missing())
            .map(|(s, _)| s.column().to_string())
            .collect()
    }

    /// Share of known input features the row carried
    pub fn coverage(&self, features: &[Feature]) -> f64 {
        if self.specs.is_empty() {
            return 1.0;
        }
        let present = features.iter().filter(|f| !f.is_missing()).count();
        present as f64 / self.specs.len() as f64
    }
}

fn fit_column(column: &str, values: &[&Value], max_categories: usize) -> Option<FeatureSpec> {
    if values.is_empty() {
        return None;
    }

    let numeric: Option<Vec<f64>> = values
        .iter()
        .map(|v| match v {
            Value::Bool(_) => None,
            other => other.as_f64(),
        })
        .collect();
    if let Some(numbers) = numeric {
        let (mean, std) = mean_std(&numbers);
        return Some(FeatureSpec::Numeric {
            column: column.to_string(),
            mean,
            std: if std > f64::EPSILON { std } else { 1.0 },
        });
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for v in values {
        *counts.entry(v.to_string()).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(max_categories);

    Some(FeatureSpec::Categorical {
        column: column.to_string(),
        categories: ranked.into_iter().map(|(c, _)| c).collect(),
    })
}

/// Case-insensitive column lookup
pub(crate) fn lookup<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.get(column).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    })
}

/// Population mean and standard deviation
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rentals() -> Dataset {
        Dataset::new(
            vec!["sqft".into(), "location".into(), "rental_price".into()],
            vec![
                vec![Value::Int(800), "good".into(), Value::Int(2000)],
                vec![Value::Int(1000), "great".into(), Value::Int(2600)],
                vec![Value::Int(1200), "good".into(), Value::Int(2800)],
                vec![Value::Null, "poor".into(), Value::Int(1500)],
            ],
        )
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_fit_detects_column_kinds() {
        let encoder = FeatureEncoder::fit(&rentals(), &["rental_price".to_string()], 10);
        assert_eq!(encoder.specs().len(), 2);

        match &encoder.specs()[0] {
            FeatureSpec::Numeric { column, mean, .. } => {
                assert_eq!(column, "sqft");
                assert!((mean - 1000.0).abs() < 1e-9);
            }
            other => panic!("expected numeric, got {:?}", other),
        }
        match &encoder.specs()[1] {
            FeatureSpec::Categorical { categories, .. } => {
                assert_eq!(categories[0], "good");
                assert_eq!(categories.len(), 3);
            }
            other => panic!("expected categorical, got {:?}", other),
        }
        assert_eq!(encoder.width(), 4);
    }

    #[test]
    fn test_missing_and_unknown_values() {
        let encoder = FeatureEncoder::fit(&rentals(), &["rental_price".to_string()], 10);

        let features = encoder.features(&row(&[("SQFT", Value::Int(1000))]));
        assert_eq!(features[0], Feature::Numeric(Some(0.0)));
        assert!(features[1].is_missing());
        assert_eq!(encoder.missing(&features), vec!["location".to_string()]);
        assert!((encoder.coverage(&features) - 0.5).abs() < 1e-9);

        let features = encoder.features(&row(&[("location", "castle".into())]));
        assert_eq!(features[1], Feature::Category(Some(3)));
        assert_eq!(encoder.vector(&features), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_category_cap_keeps_most_frequent() {
        let encoder = FeatureEncoder::fit(&rentals(), &["rental_price".to_string()], 1);
        assert_eq!(
            encoder.specs()[1],
            FeatureSpec::Categorical {
                column: "location".into(),
                categories: vec!["good".into()]
            }
        );
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((std - 2.0).abs() < 1e-9);
    }
}
