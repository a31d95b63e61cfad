//! OpenL3 audio embeddings
//!
//! Audio is resampled to 48kHz and cut into one-second windows (no
//! centring); each window is one row of the batch handed to the network.

use super::config::OpenL3Config;
use super::model::{InferenceModel, OnnxModel};
use super::FeatureExtractor;
use crate::audio::resample;
use crate::error::{AppError, Result};
use ndarray::{Array2, Array3, ArrayD, ArrayView1, Ix2};
use tracing::{debug, info, warn};

/// Sampling rate the embedding network consumes
pub const OPENL3_SAMPLE_RATE: u32 = 48000;

/// One analysis window (one second at 48kHz)
const FRAME_LENGTH: usize = OPENL3_SAMPLE_RATE as usize;

/// Frame 48kHz audio into `(n_frames, 1, FRAME_LENGTH)`
///
/// Audio shorter than one window is zero-padded to exactly one window.
pub fn frame_audio(samples: &[f32], hop_length: usize) -> Array3<f32> {
    let mut audio = samples.to_vec();
    if audio.len() < FRAME_LENGTH {
        warn!(
            "Audio shorter than one embedding window ({} < {} samples), zero-padding",
            audio.len(),
            FRAME_LENGTH
        );
        audio.resize(FRAME_LENGTH, 0.0);
    }

    let n_frames = 1 + (audio.len() - FRAME_LENGTH) / hop_length;
    let mut frames = Array3::<f32>::zeros((n_frames, 1, FRAME_LENGTH));
    for (i, mut frame) in frames.outer_iter_mut().enumerate() {
        let start = i * hop_length;
        frame
            .row_mut(0)
            .iter_mut()
            .zip(&audio[start..start + FRAME_LENGTH])
            .for_each(|(dst, &src)| *dst = src);
    }
    frames
}

/// Embedding extractor, output `(embedding_size, n_frames)`
pub struct OpenL3Extractor {
    config: OpenL3Config,
    hop_length: usize,
    model: Box<dyn InferenceModel>,
}

impl OpenL3Extractor {
    /// Validate the configuration and load the embedding network from `model_path`
    pub fn new(config: OpenL3Config) -> Result<Self> {
        config.validate()?;
        let model = OnnxModel::load(
            &config.model_path,
            &config.input_name,
            &[config.output_name.as_str()],
        )?;
        Self::with_model(config, Box::new(model))
    }

    /// Use an already-loaded network
    pub fn with_model(config: OpenL3Config, model: Box<dyn InferenceModel>) -> Result<Self> {
        config.validate()?;
        let hop_length = (config.hop_size * OPENL3_SAMPLE_RATE as f32).round() as usize;
        if hop_length == 0 {
            return Err(AppError::Configuration(format!(
                "hop size {}s is shorter than one sample at {}Hz",
                config.hop_size, OPENL3_SAMPLE_RATE
            )));
        }
        info!(
            "OpenL3 extractor: {} dims, hop {} samples, model {}",
            config.embedding_size,
            hop_length,
            model.name()
        );
        Ok(Self {
            config,
            hop_length,
            model,
        })
    }

    pub fn config(&self) -> &OpenL3Config {
        &self.config
    }
}

impl FeatureExtractor for OpenL3Extractor {
    fn name(&self) -> &str {
        "OpenL3"
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn compute_features(&self, audio: ArrayView1<'_, f32>) -> Result<ArrayD<f32>> {
        let samples = audio.to_vec();
        let samples = resample(&samples, self.config.sample_rate, OPENL3_SAMPLE_RATE)?;
        let frames = frame_audio(&samples, self.hop_length);
        let n_frames = frames.len_of(ndarray::Axis(0));

        let outputs = self.model.run(frames.into_dyn())?;
        let embedding = outputs
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Backend("embedding model returned no output".into()))?
            .into_dimensionality::<Ix2>()
            .map_err(|e| AppError::Backend(format!("embedding output is not 2-D: {}", e)))?;

        if embedding.dim() != (n_frames, self.config.embedding_size) {
            return Err(AppError::Backend(format!(
                "expected embeddings of shape ({}, {}), got {:?}",
                n_frames,
                self.config.embedding_size,
                embedding.dim()
            )));
        }

        let embedding = time_last(embedding);
        debug!("OpenL3: {} frames -> {:?}", n_frames, embedding.dim());
        Ok(embedding.into_dyn())
    }
}

/// Reorient `(n_frames, dims)` to `(dims, n_frames)` in standard layout
fn time_last(embedding: Array2<f32>) -> Array2<f32> {
    embedding.reversed_axes().as_standard_layout().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    /// Embeds each frame as `[frame mean, frame index, 0, 0, ...]`
    struct FakeEmbedding {
        dims: usize,
    }

    impl InferenceModel for FakeEmbedding {
        fn name(&self) -> &str {
            "fake-embedding"
        }

        fn run(&self, batch: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
            let n = batch.shape()[0];
            let mut out = Array2::<f32>::zeros((n, self.dims));
            for (i, frame) in batch.outer_iter().enumerate() {
                out[[i, 0]] = frame.mean().unwrap_or(0.0);
                out[[i, 1]] = i as f32;
            }
            Ok(vec![out.into_dyn()])
        }
    }

    fn extractor(hop_size: f32) -> OpenL3Extractor {
        let config = OpenL3Config::new(OPENL3_SAMPLE_RATE, hop_size, 512);
        OpenL3Extractor::with_model(config, Box::new(FakeEmbedding { dims: 512 })).unwrap()
    }

    #[test]
    fn test_time_axis_is_last() {
        let extractor = extractor(0.5);
        let audio = ndarray::Array1::<f32>::ones(48000 * 2);
        let features = extractor.extract(audio.view().into_dyn()).unwrap();

        // 1 + (96000 - 48000) / 24000 frames
        assert_eq!(features.shape(), &[512, 3]);
        let frame_index: Vec<f32> = features.index_axis(Axis(0), 1).iter().copied().collect();
        assert_eq!(frame_index, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_short_audio_padded_to_one_frame() {
        let extractor = extractor(0.1);
        let features = extractor.extract_samples(&vec![1.0; 1000]).unwrap();
        assert_eq!(features.shape(), &[512, 1]);
    }

    #[test]
    fn test_frame_audio_hops() {
        let samples: Vec<f32> = (0..60000).map(|i| i as f32).collect();
        let frames = frame_audio(&samples, 4800);
        assert_eq!(frames.dim(), (1 + 12000 / 4800, 1, 48000));
        assert_eq!(frames[[1, 0, 0]], 4800.0);
    }

    #[test]
    fn test_wrong_output_width_is_backend_error() {
        let config = OpenL3Config::new(OPENL3_SAMPLE_RATE, 0.5, 6144);
        let extractor =
            OpenL3Extractor::with_model(config, Box::new(FakeEmbedding { dims: 512 })).unwrap();
        let err = extractor.extract_samples(&vec![0.0; 48000]).unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[test]
    fn test_matrix_input_rejected() {
        let extractor = extractor(0.5);
        let matrix = Array2::<f32>::zeros((2, 48000)).into_dyn();
        let err = extractor.extract(matrix.view()).unwrap_err();
        assert!(matches!(err, AppError::InvalidInputKind(_)));
    }

    #[test]
    fn test_missing_model_fails_construction() {
        let config = OpenL3Config::new(44100, 0.1, 512).with_model_path("/nonexistent/openl3.onnx");
        assert!(OpenL3Extractor::new(config).is_err());
    }

    #[test]
    fn test_repeated_calls_identical() {
        let extractor = extractor(0.25);
        let audio: Vec<f32> = (0..70000).map(|i| (i as f32 * 0.001).sin()).collect();
        assert_eq!(
            extractor.extract_samples(&audio).unwrap(),
            extractor.extract_samples(&audio).unwrap()
        );
    }
}
