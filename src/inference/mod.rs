//! # Inference Pipeline
//!
//! Window → features → standardised vector → class probabilities.
//!
//! [`EmotionPipeline`] bundles the feature extractor with the two fitted
//! artifacts (scaler and classifier). It is built once at startup and shared
//! read-only through `Arc`; nothing in it is re-loaded per prediction.

pub mod classifier;
pub mod model;
pub mod scaler;
pub mod worker;

pub use classifier::{ClassifierAdapter, LabelScore, PredictionResult};
pub use scaler::Normalizer;

use crate::audio::decoder::Sample;
use crate::config::AppConfig;
use crate::device;
use crate::error::StreamError;
use crate::features::FeatureExtractor;
use anyhow::{anyhow, Result};
use model::CnnClassifier;
use std::time::Instant;
use tracing::{debug, info};

pub struct EmotionPipeline {
    extractor: FeatureExtractor,
    normalizer: Normalizer,
    classifier: ClassifierAdapter,
}

impl EmotionPipeline {
    /// Assemble a pipeline, checking that all three stages agree on the feature count.
    pub fn new(extractor: FeatureExtractor, normalizer: Normalizer, classifier: ClassifierAdapter) -> Result<Self> {
        let n_features = extractor.feature_len();

        if normalizer.len() != n_features {
            return Err(anyhow!(
                "Scaler was fitted on {} features but the extractor produces {}",
                normalizer.len(),
                n_features
            ));
        }

        if classifier.n_features() != n_features {
            return Err(anyhow!(
                "Classifier expects {} features but the extractor produces {}",
                classifier.n_features(),
                n_features
            ));
        }

        Ok(Self {
            extractor,
            normalizer,
            classifier,
        })
    }

    /// Load the scaler and model named in the configuration.
    pub fn load(config: &AppConfig) -> Result<Self> {
        let extractor = FeatureExtractor::new(&config.features, config.audio.sample_rate);
        let normalizer = Normalizer::load(&config.inference.scaler_path)?;

        let device = device::select_device(config.inference.device);
        let model = CnnClassifier::load(&config.inference, &device)?;
        let classifier = ClassifierAdapter::new(
            Box::new(model),
            device,
            config.inference.labels.clone(),
            config.inference.expected_features,
        );

        let pipeline = Self::new(extractor, normalizer, classifier)?;
        info!(
            features = pipeline.feature_len(),
            labels = ?pipeline.labels(),
            device = device::device_label(pipeline.classifier.device()),
            "Emotion pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn labels(&self) -> &[String] {
        self.classifier.labels()
    }

    pub fn feature_len(&self) -> usize {
        self.extractor.feature_len()
    }

    pub fn device_label(&self) -> &'static str {
        device::device_label(self.classifier.device())
    }

    /// Classify one complete window. CPU-bound; call from a blocking context.
    pub fn predict(&self, window: &[Sample]) -> Result<PredictionResult, StreamError> {
        let started = Instant::now();

        let features = self.extractor.extract(window)?;
        let normalized = self.normalizer.transform(features.as_slice())?;
        let mut result = self.classifier.classify(&normalized)?;
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            samples = window.len(),
            zcr = features.zero_crossing_rate(),
            rms = features.rms(),
            "Window classified"
        );
        Ok(result)
    }
}
