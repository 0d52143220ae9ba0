//! Soft detection module.
//!
//! Turns a dense feature map into a per-position keypoint score without any
//! non-differentiable peak picking. A position scores high when its
//! activation dominates both its local spatial window and the channel axis;
//! the per-sample score map is normalized to sum to 1.
//!
//! The module is a pure function of its input: it holds no learned
//! parameters, only the suppression window size.

use burn::prelude::*;
use burn::tensor::{activation::relu, module::avg_pool2d};

use crate::config::SoftDetectionConfig;
use crate::error::D2NetResult;

impl SoftDetectionConfig {
    /// Initializes a `SoftDetection` module.
    ///
    /// # Errors
    ///
    /// Returns `D2NetError::InvalidConfiguration` for an even window size.
    pub fn init(&self) -> D2NetResult<SoftDetection> {
        self.validate()?;

        Ok(SoftDetection {
            soft_local_max_size: self.soft_local_max_size,
            pad: self.soft_local_max_size / 2,
        })
    }
}

/// Differentiable keypoint scoring over a dense feature map.
#[derive(Module, Debug, Clone)]
pub struct SoftDetection {
    soft_local_max_size: usize,
    pad: usize,
}

impl SoftDetection {
    /// Forward pass.
    ///
    /// Input is a `(batch, C, H, W)` feature map; output is a
    /// `(batch, H, W)` score map, non-negative and summing to 1 over each
    /// sample's spatial extent. A feature map that is all-zero after the
    /// non-negativity clamp divides by near-zero here; such input is
    /// outside the contract.
    pub fn forward<B: Backend>(&self, batch: Tensor<B, 4>) -> Tensor<B, 3> {
        let [b, c, h, w] = batch.dims();

        let batch = relu(batch);

        // Stabilize the exponential by the per-sample global max.
        let max_per_sample = batch.clone().reshape([b, c * h * w]).max_dim(1);
        let exp = (batch.clone() / max_per_sample.reshape([b, 1, 1, 1])).exp();

        // Windowed sum of exponentials around every position. The border is
        // padded with exp(0) = 1 so edge positions compete against the same
        // window mass as interior ones.
        let size = self.soft_local_max_size;
        let padded = exp.clone().pad(
            (self.pad, self.pad, self.pad, self.pad),
            B::FloatElem::from_elem(1.0),
        );
        let sum_exp = avg_pool2d(padded, [size, size], [1, 1], [0, 0], true)
            .mul_scalar((size * size) as f64);
        let local_max_score = exp / sum_exp;

        // Ratio to the channel-wise max at every position.
        let depth_wise_max = batch.clone().max_dim(1);
        let depth_wise_max_score = batch / depth_wise_max;

        let all_scores = local_max_score * depth_wise_max_score;
        let score = all_scores.max_dim(1).squeeze::<3>(1);

        // Probability-like distribution over each sample's spatial extent.
        let normalization = score.clone().reshape([b, h * w]).sum_dim(1);
        score / normalization.reshape([b, 1, 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn detection() -> SoftDetection {
        SoftDetectionConfig::new().init().unwrap()
    }

    #[test]
    fn scores_are_non_negative_and_sum_to_one_per_sample() {
        let device = Default::default();
        // Strictly positive: a position whose activations are all clamped
        // to zero has no well-defined channel-max ratio.
        let features = Tensor::<TestBackend, 4>::random(
            [3, 8, 12, 16],
            Distribution::Uniform(0.1, 1.0),
            &device,
        );

        let scores = detection().forward(features);
        assert_eq!(scores.dims(), [3, 12, 16]);

        let min: f32 = scores.clone().min().into_scalar();
        assert!(min >= 0.0);

        for sample in 0..3 {
            let sum: f32 = scores.clone().narrow(0, sample, 1).sum().into_scalar();
            assert!((sum - 1.0).abs() < 1e-5, "sample {sample} sums to {sum}");
        }
    }

    #[test]
    fn scores_are_invariant_to_positive_rescaling() {
        let device = Default::default();
        let features = Tensor::<TestBackend, 4>::random(
            [2, 4, 8, 8],
            Distribution::Uniform(0.1, 1.0),
            &device,
        );

        let module = detection();
        let scores = module.forward(features.clone());
        let scores_scaled = module.forward(features.mul_scalar(7.5));

        let max_diff: f32 = (scores - scores_scaled).abs().max().into_scalar();
        assert!(max_diff < 1e-5);
    }

    #[test]
    fn dominant_activation_receives_the_highest_score() {
        let device = Default::default();
        let (c, h, w) = (4, 6, 6);

        // Flat positive background with a single strong response.
        let mut values = vec![0.5_f32; c * h * w];
        let (spike_y, spike_x) = (2, 3);
        values[h * w + spike_y * w + spike_x] = 10.0;

        let features = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(values, [1, c, h, w]),
            &device,
        );

        let scores = detection().forward(features);
        let peak: i64 = scores.reshape([h * w]).argmax(0).into_scalar();
        assert_eq!(peak as usize, spike_y * w + spike_x);
    }

    #[test]
    fn window_size_must_be_odd() {
        let result = SoftDetectionConfig::new()
            .with_soft_local_max_size(4)
            .init();
        assert!(result.is_err());
    }
}
