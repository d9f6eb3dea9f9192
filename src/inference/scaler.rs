//! Standardisation of feature vectors with statistics fitted at training time.
//!
//! The artifact is a JSON object exported from the fitted scaler:
//!
//! ```json
//! { "mean": [0.051, 0.43, ...], "scale": [0.021, 0.11, ...] }
//! ```
//!
//! `mean_` / `scale_` are accepted as aliases so the attribute names of the
//! fitting library can be dumped directly.

use crate::error::StreamError;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalizer {
    #[serde(alias = "mean_")]
    mean: Vec<f64>,
    #[serde(alias = "scale_")]
    scale: Vec<f64>,
}

impl Normalizer {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self> {
        let normalizer = Self { mean, scale };
        normalizer.check()?;
        Ok(normalizer)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler parameters from {:?}", path))?;
        let normalizer: Normalizer = serde_json::from_str(&content)
            .with_context(|| format!("Invalid scaler parameters in {:?}", path))?;
        normalizer.check()?;

        info!(path = ?path, features = normalizer.len(), "Scaler parameters loaded");
        Ok(normalizer)
    }

    fn check(&self) -> Result<()> {
        if self.mean.is_empty() {
            return Err(anyhow!("Scaler has no features"));
        }
        if self.mean.len() != self.scale.len() {
            return Err(anyhow!(
                "Scaler mean has {} entries but scale has {}",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if let Some(i) = self.scale.iter().position(|s| !s.is_finite() || *s == 0.0) {
            return Err(anyhow!("Scaler scale[{}] must be finite and non-zero", i));
        }
        if let Some(i) = self.mean.iter().position(|m| !m.is_finite()) {
            return Err(anyhow!("Scaler mean[{}] must be finite", i));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// `(x - mean) / scale`, elementwise, narrowed to the model's `f32`.
    pub fn transform(&self, features: &[f64]) -> Result<Vec<f32>, StreamError> {
        if features.len() != self.len() {
            return Err(StreamError::Shape {
                context: "scaler input",
                expected: self.len(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((x, mean), scale)| ((x - mean) / scale) as f32)
            .collect())
    }
}
