//! # 1-D CNN Emotion Model
//!
//! Candle port of the trained Keras network. The layer layout comes from
//! [`ArchitectureConfig`]; weights come from a safetensors file with these
//! tensor names:
//!
//! | Tensor                          | Shape                        |
//! |---------------------------------|------------------------------|
//! | `conv{i}.weight` / `conv{i}.bias` | `(filters, in_channels, kernel)` / `(filters,)` |
//! | `dense{i}.weight` / `dense{i}.bias` | `(units, in_units)` / `(units,)` |
//! | `output.weight` / `output.bias` | `(n_labels, in_units)` / `(n_labels,)` |
//!
//! ## Forward pass:
//! 1. `(1, n_features, 1)` input, transposed to channels-first `(1, 1, n_features)`
//! 2. per conv block: same-padded conv → ReLU → max-pool (stride = pool size)
//! 3. flatten in length-major order (`(1, L, C)`), matching Keras `Flatten`
//! 4. dense layers with ReLU, then the output layer with softmax
//!
//! Exported Keras kernels must be permuted from `(kernel, in, out)` to
//! `(out, in, kernel)` and dense kernels transposed.

use crate::config::{ArchitectureConfig, InferenceConfig};
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{conv1d, linear, Conv1d, Conv1dConfig, Linear, VarBuilder};
use tracing::info;

pub struct CnnClassifier {
    convs: Vec<Conv1d>,
    pool_size: usize,
    dense: Vec<Linear>,
    output: Linear,
}

impl CnnClassifier {
    /// Build the network from any variable source.
    pub fn new(vb: VarBuilder, arch: &ArchitectureConfig, n_features: usize, n_labels: usize) -> Result<Self> {
        let conv_config = Conv1dConfig {
            padding: arch.kernel_size / 2,
            ..Default::default()
        };

        let mut convs = Vec::with_capacity(arch.conv_filters.len());
        let mut channels = 1;
        let mut length = n_features;
        for (i, &filters) in arch.conv_filters.iter().enumerate() {
            convs.push(conv1d(channels, filters, arch.kernel_size, conv_config, vb.pp(format!("conv{}", i)))?);
            channels = filters;
            length = (length + 2 * (arch.kernel_size / 2) + 1 - arch.kernel_size) / arch.pool_size;
            if length == 0 {
                return Err(anyhow!(
                    "Conv block {} reduces a {}-feature input to nothing",
                    i,
                    n_features
                ));
            }
        }

        let mut dense = Vec::with_capacity(arch.dense_units.len());
        let mut width = channels * length;
        for (i, &units) in arch.dense_units.iter().enumerate() {
            dense.push(linear(width, units, vb.pp(format!("dense{}", i)))?);
            width = units;
        }

        let output = linear(width, n_labels, vb.pp("output"))?;

        Ok(Self {
            convs,
            pool_size: arch.pool_size,
            dense,
            output,
        })
    }

    /// Memory-map the safetensors weights named in the configuration.
    pub fn load(config: &InferenceConfig, device: &Device) -> Result<Self> {
        let path = &config.model_path;
        if !path.exists() {
            return Err(anyhow!("Model weights not found at {:?}", path));
        }

        // SAFETY: the weights file is not modified while the process runs.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        let model = Self::new(vb, &config.architecture, config.expected_features, config.labels.len())
            .with_context(|| format!("Model weights in {:?} do not match the configured architecture", path))?;

        info!(
            path = ?path,
            conv_blocks = model.convs.len(),
            dense_layers = model.dense.len(),
            labels = config.labels.len(),
            "Emotion model loaded"
        );
        Ok(model)
    }
}

impl Module for CnnClassifier {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = xs.transpose(1, 2)?.contiguous()?;

        for conv in &self.convs {
            xs = conv.forward(&xs)?.relu()?;
            xs = xs
                .unsqueeze(2)?
                .max_pool2d_with_stride((1, self.pool_size), (1, self.pool_size))?
                .squeeze(2)?;
        }

        let mut xs = xs.transpose(1, 2)?.contiguous()?.flatten_from(1)?;
        for layer in &self.dense {
            xs = layer.forward(&xs)?.relu()?;
        }

        candle_nn::ops::softmax_last_dim(&self.output.forward(&xs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn small_arch() -> ArchitectureConfig {
        ArchitectureConfig {
            conv_filters: vec![4, 8],
            kernel_size: 5,
            pool_size: 2,
            dense_units: vec![16],
        }
    }

    #[test]
    fn test_forward_produces_a_distribution() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = CnnClassifier::new(vb, &small_arch(), 142, 2).unwrap();

        let input = Tensor::ones((1, 142, 1), DType::F32, &Device::Cpu).unwrap();
        let output = model.forward(&input).unwrap();
        assert_eq!(output.dims(), &[1, 2]);

        let row = output.to_vec2::<f32>().unwrap().remove(0);
        assert!(row.iter().all(|p| *p >= 0.0));
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_registers_expected_tensor_names() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        CnnClassifier::new(vb, &small_arch(), 142, 2).unwrap();

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["conv0.weight"].dims(), &[4, 1, 5]);
        assert_eq!(data["conv1.weight"].dims(), &[8, 4, 5]);
        // 142 -> 71 -> 35 positions, 8 channels
        assert_eq!(data["dense0.weight"].dims(), &[16, 35 * 8]);
        assert_eq!(data["output.weight"].dims(), &[2, 16]);
    }

    #[test]
    fn test_missing_weights_file_is_reported() {
        let mut config = crate::config::AppConfig::default().inference;
        config.model_path = std::path::PathBuf::from("/nonexistent/model.safetensors");
        let err = CnnClassifier::load(&config, &Device::Cpu).err().unwrap();
        assert!(err.to_string().contains("not found"));
    }
}
