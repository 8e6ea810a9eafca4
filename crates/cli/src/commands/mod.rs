//! CLI command implementations

pub mod datasources;
pub mod predictors;
pub mod sql;
pub mod tables;

use crate::client::Dataset;
use anyhow::{Context, Result};
use std::path::Path;

/// Read a `{ "columns": [...], "rows": [[...]] }` file
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let data: Dataset = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a dataset document", path.display()))?;
    if let Some(i) = data.rows.iter().position(|r| r.len() != data.columns.len()) {
        anyhow::bail!(
            "row {} of {} has {} values, expected {}",
            i,
            path.display(),
            data.rows[i].len(),
            data.columns.len()
        );
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rentals.json");
        std::fs::write(
            &path,
            r#"{"columns":["sqft","location"],"rows":[[900,"good"],[1200,"great"]]}"#,
        )
        .unwrap();
        let data = read_dataset(&path).unwrap();
        assert_eq!(data.columns, vec!["sqft", "location"]);
        assert_eq!(data.rows.len(), 2);
    }

    #[test]
    fn test_read_dataset_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"columns":["a","b"],"rows":[[1]]}"#).unwrap();
        let err = read_dataset(&path).unwrap_err();
        assert!(err.to_string().contains("expected 2"));

        assert!(read_dataset(&dir.path().join("missing.json")).is_err());
    }
}
