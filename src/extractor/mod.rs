pub mod cae;
pub mod config;
pub mod cqt;
pub mod mel;
pub mod mfcc;
pub mod model;
pub mod openl3;
pub mod scattering;

use crate::error::{AppError, Result};
use ndarray::{ArrayD, ArrayView1, ArrayViewD, Ix1};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use cae::CaeExtractor;
pub use config::{
    CaeConfig, CqtConfig, ExtractorConfig, JtfsConfig, MfccConfig, OpenL3Config, CAE_SAMPLE_RATE,
};
pub use cqt::ConstantQ;
pub use mfcc::MfccExtractor;
pub use model::{InferenceModel, OnnxModel};
pub use openl3::OpenL3Extractor;
pub use scattering::JtfsExtractor;

/// Available feature extractors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Pretrained embedding network
    OpenL3,
    /// Mel-frequency cepstral coefficients
    Mfcc,
    /// Joint time-frequency scattering
    Jtfs,
    /// Convolutional autoencoder over constant-Q n-grams
    Cae,
}

impl ExtractorKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ExtractorKind::OpenL3 => "OpenL3",
            ExtractorKind::Mfcc => "MFCC",
            ExtractorKind::Jtfs => "JTFS",
            ExtractorKind::Cae => "CAE",
        }
    }

    /// Default configuration for this extractor
    pub fn default_config(&self) -> ExtractorConfig {
        match self {
            ExtractorKind::OpenL3 => ExtractorConfig::OpenL3(OpenL3Config::default()),
            ExtractorKind::Mfcc => ExtractorConfig::Mfcc(MfccConfig::default()),
            ExtractorKind::Jtfs => ExtractorConfig::Jtfs(JtfsConfig::default()),
            ExtractorKind::Cae => ExtractorConfig::Cae(CaeConfig::default()),
        }
    }
}

impl From<&ExtractorConfig> for ExtractorKind {
    fn from(config: &ExtractorConfig) -> Self {
        match config {
            ExtractorConfig::OpenL3(_) => ExtractorKind::OpenL3,
            ExtractorConfig::Mfcc(_) => ExtractorKind::Mfcc,
            ExtractorConfig::Jtfs(_) => ExtractorKind::Jtfs,
            ExtractorConfig::Cae(_) => ExtractorKind::Cae,
        }
    }
}

/// View an arbitrary-rank array as mono audio
///
/// Anything other than a one-dimensional array is rejected with
/// [`AppError::InvalidInputKind`].
pub fn as_mono(audio: ArrayViewD<'_, f32>) -> Result<ArrayView1<'_, f32>> {
    let shape = audio.shape().to_vec();
    audio.into_dimensionality::<Ix1>().map_err(|_| {
        AppError::InvalidInputKind(format!(
            "expected a one-dimensional sample array, got shape {:?}",
            shape
        ))
    })
}

/// Trait for timbre feature extractors
///
/// Every extractor maps a mono buffer to a feature array whose shape depends
/// only on its configuration and the input length.
pub trait FeatureExtractor: Send + Sync {
    /// Extractor name for logging
    fn name(&self) -> &str;

    /// Sampling rate the extractor expects its input at
    fn sample_rate(&self) -> u32;

    /// Compute features for a mono buffer
    fn compute_features(&self, audio: ArrayView1<'_, f32>) -> Result<ArrayD<f32>>;

    /// Validate that `audio` is one-dimensional, then compute features
    fn extract(&self, audio: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        let mono = as_mono(audio)?;
        self.compute_features(mono)
    }

    /// Compute features for samples already held as a slice
    fn extract_samples(&self, samples: &[f32]) -> Result<ArrayD<f32>> {
        self.compute_features(ArrayView1::from(samples))
    }
}

/// Extractor selected at runtime from an [`ExtractorConfig`]
pub struct DynamicExtractor {
    extractor: Box<dyn FeatureExtractor>,
    kind: ExtractorKind,
}

impl DynamicExtractor {
    /// Build the extractor described by `config`, loading any model it needs
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let kind = ExtractorKind::from(config);
        let extractor: Box<dyn FeatureExtractor> = match config {
            ExtractorConfig::OpenL3(c) => Box::new(OpenL3Extractor::new(c.clone())?),
            ExtractorConfig::Mfcc(c) => Box::new(MfccExtractor::new(c.clone())?),
            ExtractorConfig::Jtfs(c) => Box::new(JtfsExtractor::new(c.clone())?),
            ExtractorConfig::Cae(c) => Box::new(CaeExtractor::new(c.clone())?),
        };
        info!("{} extractor ready at {}Hz", kind.display_name(), extractor.sample_rate());
        Ok(Self { extractor, kind })
    }

    pub fn kind(&self) -> ExtractorKind {
        self.kind
    }
}

impl FeatureExtractor for DynamicExtractor {
    fn name(&self) -> &str {
        self.extractor.name()
    }

    fn sample_rate(&self) -> u32 {
        self.extractor.sample_rate()
    }

    fn compute_features(&self, audio: ArrayView1<'_, f32>) -> Result<ArrayD<f32>> {
        self.extractor.compute_features(audio)
    }
}
