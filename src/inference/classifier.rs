//! Classifier adapter: feeds a normalised vector to the model and turns the
//! output row into a labelled prediction.
//!
//! The model is any [`candle_core::Module`] mapping a `(1, n_features, 1)`
//! tensor to `(1, n_labels)` class probabilities. Production uses the 1-D CNN
//! in [`super::model`]; tests plug in closures.

use crate::error::StreamError;
use candle_core::{DType, Device, Module, Tensor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probabilities may drift slightly from 1 after softmax in `f32`.
const SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub probability: f32,
}

/// Outcome of classifying one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: String,
    pub label_index: usize,
    /// Probability of the winning label
    pub confidence: f32,
    /// One entry per label, in model output order
    pub scores: Vec<LabelScore>,
    pub timestamp: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl PredictionResult {
    pub fn probabilities(&self) -> Vec<f32> {
        self.scores.iter().map(|s| s.probability).collect()
    }
}

pub struct ClassifierAdapter {
    model: Box<dyn Module + Send + Sync>,
    device: Device,
    labels: Vec<String>,
    n_features: usize,
}

impl ClassifierAdapter {
    pub fn new(
        model: Box<dyn Module + Send + Sync>,
        device: Device,
        labels: Vec<String>,
        n_features: usize,
    ) -> Self {
        Self {
            model,
            device,
            labels,
            n_features,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn classify(&self, normalized: &[f32]) -> Result<PredictionResult, StreamError> {
        if normalized.len() != self.n_features {
            return Err(StreamError::Inference(format!(
                "Classifier expects {} features, got {}",
                self.n_features,
                normalized.len()
            )));
        }

        let input = Tensor::from_slice(normalized, (1, self.n_features, 1), &self.device)?;
        let output = self.model.forward(&input)?;

        if output.dims() != [1, self.labels.len()] {
            return Err(StreamError::Inference(format!(
                "Model output shape {:?} does not match {} labels",
                output.dims(),
                self.labels.len()
            )));
        }

        let row = output
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?
            .into_iter()
            .next()
            .ok_or_else(|| StreamError::Inference("Model returned no rows".to_string()))?;

        let probabilities = normalize_probabilities(row)?;
        let (label_index, confidence) = argmax(&probabilities);

        let scores = self
            .labels
            .iter()
            .zip(&probabilities)
            .map(|(label, &probability)| LabelScore {
                label: label.clone(),
                probability,
            })
            .collect();

        Ok(PredictionResult {
            label: self.labels[label_index].clone(),
            label_index,
            confidence,
            scores,
            timestamp: Utc::now(),
            processing_time_ms: 0,
        })
    }
}

fn normalize_probabilities(row: Vec<f32>) -> Result<Vec<f32>, StreamError> {
    if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(StreamError::Inference(format!(
            "Model output is not a probability distribution: {:?}",
            row
        )));
    }

    let sum: f32 = row.iter().sum();
    if sum <= 0.0 {
        return Err(StreamError::Inference("Model output sums to zero".to_string()));
    }

    if (sum - 1.0).abs() <= SUM_TOLERANCE {
        Ok(row)
    } else {
        Ok(row.into_iter().map(|p| p / sum).collect())
    }
}

/// Index and value of the largest entry; the first one wins ties.
fn argmax(values: &[f32]) -> (usize, f32) {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    (best, values[best])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["Happy".to_string(), "Neutral".to_string()]
    }

    fn fixed_output(values: &'static [f32]) -> Box<dyn Module + Send + Sync> {
        Box::new(move |_: &Tensor| Tensor::from_slice(values, (1, values.len()), &Device::Cpu))
    }

    #[test]
    fn test_label_is_argmax_of_probabilities() {
        let adapter = ClassifierAdapter::new(fixed_output(&[0.2, 0.8]), Device::Cpu, labels(), 142);
        let result = adapter.classify(&[0.0; 142]).unwrap();

        assert_eq!(result.label, "Neutral");
        assert_eq!(result.label_index, 1);
        assert!((result.confidence - 0.8).abs() < 1e-6);
        let sum: f32 = result.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_ties_pick_the_first_label() {
        let adapter = ClassifierAdapter::new(fixed_output(&[0.5, 0.5]), Device::Cpu, labels(), 142);
        assert_eq!(adapter.classify(&[0.0; 142]).unwrap().label, "Happy");
    }

    #[test]
    fn test_unnormalised_output_is_rescaled() {
        let adapter = ClassifierAdapter::new(fixed_output(&[3.0, 1.0]), Device::Cpu, labels(), 142);
        let result = adapter.classify(&[0.0; 142]).unwrap();
        assert!((result.scores[0].probability - 0.75).abs() < 1e-6);
        assert!((result.scores[1].probability - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_input_length_is_rejected() {
        let adapter = ClassifierAdapter::new(fixed_output(&[0.2, 0.8]), Device::Cpu, labels(), 142);
        let err = adapter.classify(&[0.0; 100]).unwrap_err();
        assert_eq!(err.code(), "inference_error");
    }

    #[test]
    fn test_output_width_must_match_labels() {
        let adapter = ClassifierAdapter::new(fixed_output(&[0.1, 0.2, 0.7]), Device::Cpu, labels(), 142);
        let err = adapter.classify(&[0.0; 142]).unwrap_err();
        assert_eq!(err.code(), "inference_error");
        assert!(err.to_string().contains("[1, 3]"));
    }

    #[test]
    fn test_nan_output_is_an_inference_error() {
        let adapter = ClassifierAdapter::new(fixed_output(&[f32::NAN, 1.0]), Device::Cpu, labels(), 142);
        assert_eq!(adapter.classify(&[0.0; 142]).unwrap_err().code(), "inference_error");
    }
}
