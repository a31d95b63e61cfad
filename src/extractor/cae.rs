//! Convolutional autoencoder features over constant-Q n-grams
//!
//! CQT magnitude → per-column standardization → overlapping n-grams →
//! per-n-gram standardization → batch → two-branch network. The amplitude
//! and phase branches are stacked into planes 0 and 1 of the result.

use super::config::CaeConfig;
use super::cqt::ConstantQ;
use super::model::{InferenceModel, OnnxModel};
use super::FeatureExtractor;
use crate::error::{AppError, Result};
use ndarray::{
    s, stack, Array2, Array4, ArrayD, ArrayView1, ArrayView2, ArrayViewMut, Axis, Dimension, IxDyn,
};
use tracing::{debug, info};

/// Below this standard deviation a column or window is only mean-centred
const STD_FLOOR: f32 = 1e-8;

/// Standardize `values` in place to zero mean and unit variance
fn standardize<D: Dimension>(mut values: ArrayViewMut<'_, f32, D>) {
    let mean = values.mean().unwrap_or(0.0);
    let std = values.std(0.0);
    let std = if std < STD_FLOOR { 1.0 } else { std };
    values.mapv_inplace(|x| (x - mean) / std);
}

/// Standardize every column (time frame) of a spectrogram across its bins
pub fn standardize_columns(spectrogram: &mut Array2<f32>) {
    for column in spectrogram.columns_mut() {
        standardize(column);
    }
}

/// Number of complete n-grams; a trailing partial window is dropped
pub fn ngram_count(n_frames: usize, length: usize, hop: usize) -> usize {
    if n_frames < length {
        0
    } else {
        (n_frames - length) / hop + 1
    }
}

/// Slice `(n_bins, n_frames)` into standardized n-grams, shape `(n, n_bins, length, 1)`
pub fn ngram_batch(spectrogram: ArrayView2<'_, f32>, length: usize, hop: usize) -> Array4<f32> {
    let (n_bins, n_frames) = spectrogram.dim();
    let n_windows = ngram_count(n_frames, length, hop);
    let mut batch = Array4::<f32>::zeros((n_windows, n_bins, length, 1));

    for (i, mut window) in batch.outer_iter_mut().enumerate() {
        let start = i * hop;
        window
            .index_axis_mut(Axis(2), 0)
            .assign(&spectrogram.slice(s![.., start..start + length]));
        standardize(window);
    }

    batch
}

/// Autoencoder extractor, output `(2, n_windows, ...)` with amplitude then phase
///
/// The network reconstructs its input, so each output has the batch shape
/// `(n_windows, n_bins, ngram_length, 1)`. Audio too short for one n-gram
/// skips inference and returns that shape with zero windows.
pub struct CaeExtractor {
    config: CaeConfig,
    cqt: ConstantQ,
    model: Box<dyn InferenceModel>,
}

impl CaeExtractor {
    /// Validate the configuration, then load the network from `weights_path`
    ///
    /// The sampling rate is checked before the weights file is touched.
    pub fn new(config: CaeConfig) -> Result<Self> {
        config.validate()?;
        let model = OnnxModel::load(
            &config.weights_path,
            &config.input_name,
            &[config.amplitude_output.as_str(), config.phase_output.as_str()],
        )?;
        Self::with_model(config, Box::new(model))
    }

    /// Use an already-loaded two-output network
    pub fn with_model(config: CaeConfig, model: Box<dyn InferenceModel>) -> Result<Self> {
        config.validate()?;
        let cqt = ConstantQ::new(config.cqt())?;
        info!(
            "CAE extractor: {} CQT bins, n-grams of {} frames (hop {}), model {}",
            config.n_bins,
            config.ngram_length,
            config.ngram_hop,
            model.name()
        );
        Ok(Self { config, cqt, model })
    }

    pub fn config(&self) -> &CaeConfig {
        &self.config
    }
}

impl FeatureExtractor for CaeExtractor {
    fn name(&self) -> &str {
        "CAE"
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn compute_features(&self, audio: ArrayView1<'_, f32>) -> Result<ArrayD<f32>> {
        let samples = audio.to_vec();
        let mut spectrogram = self.cqt.magnitude(&samples);
        standardize_columns(&mut spectrogram);

        let batch = ngram_batch(spectrogram.view(), self.config.ngram_length, self.config.ngram_hop);
        let n_windows = batch.len_of(Axis(0));
        if n_windows == 0 {
            debug!(
                "CAE: {} frames is shorter than one n-gram, skipping inference",
                spectrogram.ncols()
            );
            return Ok(ArrayD::zeros(IxDyn(&[
                2,
                0,
                self.config.n_bins,
                self.config.ngram_length,
                1,
            ])));
        }

        let mut outputs = self.model.run(batch.into_dyn())?.into_iter();
        let (amplitude, phase) = match (outputs.next(), outputs.next()) {
            (Some(a), Some(p)) => (a, p),
            _ => {
                return Err(AppError::Backend(
                    "autoencoder must return amplitude and phase outputs".into(),
                ))
            }
        };
        if amplitude.shape() != phase.shape() {
            return Err(AppError::Backend(format!(
                "amplitude {:?} and phase {:?} outputs differ in shape",
                amplitude.shape(),
                phase.shape()
            )));
        }

        let features = stack(Axis(0), &[amplitude.view(), phase.view()])
            .map_err(|e| AppError::Backend(format!("Failed to stack outputs: {}", e)))?;
        debug!("CAE: {} n-grams -> {:?}", n_windows, features.shape());
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::config::CAE_SAMPLE_RATE;
    use ndarray::Array1;
    use std::f32::consts::PI;

    /// Returns the batch as "amplitude" and its absolute value as "phase"
    struct FakeAutoencoder;

    impl InferenceModel for FakeAutoencoder {
        fn name(&self) -> &str {
            "fake-cae"
        }

        fn run(&self, batch: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
            let phase = batch.mapv(f32::abs);
            Ok(vec![batch, phase])
        }
    }

    /// Returns outputs whose shapes disagree
    struct MismatchedAutoencoder;

    impl InferenceModel for MismatchedAutoencoder {
        fn name(&self) -> &str {
            "mismatched-cae"
        }

        fn run(&self, batch: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
            Ok(vec![batch, ArrayD::zeros(IxDyn(&[1]))])
        }
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * 220.0 * i as f32 / CAE_SAMPLE_RATE as f32).sin())
            .collect()
    }

    #[test]
    fn test_rejects_wrong_sample_rate_without_io() {
        // The weights path does not exist; a Configuration error proves it was never opened
        let config = CaeConfig::new(44100, "/nonexistent/cae.onnx");
        let err = CaeExtractor::new(config).err().unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_missing_weights_is_backend_error() {
        let config = CaeConfig::new(CAE_SAMPLE_RATE, "/nonexistent/cae.onnx");
        let err = CaeExtractor::new(config).err().unwrap();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[test]
    fn test_two_planes_with_matching_shapes() {
        let extractor = CaeExtractor::with_model(CaeConfig::default(), Box::new(FakeAutoencoder)).unwrap();
        let audio = Array1::from(tone(CAE_SAMPLE_RATE as usize));
        let features = extractor.extract(audio.view().into_dyn()).unwrap();

        let n_frames = 1 + CAE_SAMPLE_RATE as usize / 512;
        let n_windows = ngram_count(n_frames, 16, 8);
        assert_eq!(features.shape(), &[2, n_windows, 84, 16, 1]);
        assert_eq!(
            features.index_axis(Axis(0), 0).shape(),
            features.index_axis(Axis(0), 1).shape()
        );
    }

    #[test]
    fn test_short_audio_yields_no_windows() {
        let extractor = CaeExtractor::with_model(CaeConfig::default(), Box::new(FakeAutoencoder)).unwrap();
        let features = extractor.extract_samples(&tone(1024)).unwrap();
        assert_eq!(features.shape(), &[2, 0, 84, 16, 1]);
    }

    #[test]
    fn test_matrix_input_rejected() {
        let extractor = CaeExtractor::with_model(CaeConfig::default(), Box::new(FakeAutoencoder)).unwrap();
        let matrix = Array2::<f32>::zeros((2, 22050)).into_dyn();
        let err = extractor.extract(matrix.view()).unwrap_err();
        assert!(matches!(err, AppError::InvalidInputKind(_)));
    }

    #[test]
    fn test_mismatched_outputs_rejected() {
        let extractor =
            CaeExtractor::with_model(CaeConfig::default(), Box::new(MismatchedAutoencoder)).unwrap();
        let err = extractor.extract_samples(&tone(CAE_SAMPLE_RATE as usize)).unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[test]
    fn test_repeated_calls_identical() {
        let extractor = CaeExtractor::with_model(CaeConfig::default(), Box::new(FakeAutoencoder)).unwrap();
        let audio = tone(20_000);
        assert_eq!(
            extractor.extract_samples(&audio).unwrap(),
            extractor.extract_samples(&audio).unwrap()
        );
    }

    #[test]
    fn test_ngram_count_drops_partial_tail() {
        assert_eq!(ngram_count(15, 16, 8), 0);
        assert_eq!(ngram_count(16, 16, 8), 1);
        assert_eq!(ngram_count(23, 16, 8), 1);
        assert_eq!(ngram_count(24, 16, 8), 2);
    }

    #[test]
    fn test_ngrams_are_standardized() {
        let spectrogram = Array2::from_shape_fn((4, 10), |(b, t)| (b * 10 + t) as f32);
        let batch = ngram_batch(spectrogram.view(), 4, 3);
        assert_eq!(batch.dim(), (3, 4, 4, 1));
        for window in batch.outer_iter() {
            let mean = window.mean().unwrap();
            let std = window.std(0.0);
            assert!(mean.abs() < 1e-5);
            assert!((std - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_columns_standardized() {
        let mut spectrogram = Array2::from_shape_fn((5, 3), |(b, t)| (b + t) as f32);
        standardize_columns(&mut spectrogram);
        for column in spectrogram.columns() {
            assert!(column.mean().unwrap().abs() < 1e-5);
            assert!((column.std(0.0) - 1.0).abs() < 1e-4);
        }
    }
}
