use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sampling rate the convolutional autoencoder was trained at
pub const CAE_SAMPLE_RATE: u32 = 22050;

/// Embedding sizes published for the OpenL3 audio models
pub const OPENL3_EMBEDDING_SIZES: [usize; 2] = [512, 6144];

/// Configuration for the OpenL3 embedding extractor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenL3Config {
    /// Sampling rate of the audio handed to `extract`
    pub sample_rate: u32,
    /// Hop between analysis windows, in seconds
    pub hop_size: f32,
    /// Embedding dimensionality (512 or 6144)
    pub embedding_size: usize,
    /// ONNX export of the embedding network
    pub model_path: PathBuf,
    pub input_name: String,
    pub output_name: String,
}

impl Default for OpenL3Config {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            hop_size: 0.1,
            embedding_size: 512,
            model_path: PathBuf::from("models/openl3_music_mel256_512.onnx"),
            input_name: "audio".to_string(),
            output_name: "embedding".to_string(),
        }
    }
}

impl OpenL3Config {
    pub fn new(sample_rate: u32, hop_size: f32, embedding_size: usize) -> Self {
        Self {
            sample_rate,
            hop_size,
            embedding_size,
            ..Default::default()
        }
    }

    pub fn with_model_path(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.model_path = model_path.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AppError::Configuration("sample rate must be positive".into()));
        }
        if !(self.hop_size > 0.0) {
            return Err(AppError::Configuration(format!(
                "hop size must be positive, got {}",
                self.hop_size
            )));
        }
        if !OPENL3_EMBEDDING_SIZES.contains(&self.embedding_size) {
            return Err(AppError::Configuration(format!(
                "embedding size must be one of {:?}, got {}",
                OPENL3_EMBEDDING_SIZES, self.embedding_size
            )));
        }
        Ok(())
    }
}

/// Configuration for MFCC extraction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MfccConfig {
    pub sample_rate: u32,
    pub hop_length: usize,
    pub n_fft: usize,
    pub n_mfcc: usize,
    pub n_mels: usize,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            hop_length: 2048,
            n_fft: 2048,
            n_mfcc: 20,
            n_mels: 128,
        }
    }
}

impl MfccConfig {
    pub fn new(sample_rate: u32, hop_length: usize, n_fft: usize) -> Self {
        Self {
            sample_rate,
            hop_length,
            n_fft,
            ..Default::default()
        }
    }

    pub fn with_n_mfcc(mut self, n_mfcc: usize) -> Self {
        self.n_mfcc = n_mfcc;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.hop_length == 0 || self.n_fft == 0 {
            return Err(AppError::Configuration(
                "sample rate, hop length and FFT size must be positive".into(),
            ));
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return Err(AppError::Configuration(format!(
                "n_mfcc must be in 1..={}, got {}",
                self.n_mels, self.n_mfcc
            )));
        }
        Ok(())
    }
}

/// Configuration for joint time-frequency scattering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JtfsConfig {
    pub sample_rate: u32,
    /// Number of octaves covered by the temporal wavelets
    pub j: usize,
    /// Wavelets per octave for the first and second order
    pub q: (usize, usize),
    /// Number of octaves covered by the frequential wavelets
    pub j_fr: usize,
    /// Frequential wavelets per octave
    pub q_fr: usize,
    /// Temporal invariance scale, in samples
    pub t: usize,
    /// Frequential invariance scale, in first-order bins
    pub f: usize,
}

impl Default for JtfsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            j: 6,
            q: (12, 2),
            j_fr: 4,
            q_fr: 4,
            t: 64,
            f: 16,
        }
    }
}

impl JtfsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AppError::Configuration("sample rate must be positive".into()));
        }
        if self.j == 0 || self.q.0 == 0 || self.q.1 == 0 || self.j_fr == 0 || self.q_fr == 0 {
            return Err(AppError::Configuration(
                "scattering scales and quality factors must be positive".into(),
            ));
        }
        if self.t == 0 || self.f == 0 {
            return Err(AppError::Configuration(
                "invariance scales T and F must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Number of first-order (log-frequency) channels
    pub fn n_first_order(&self) -> usize {
        self.j * self.q.0
    }

    /// Number of second-order temporal wavelets
    pub fn n_second_order(&self) -> usize {
        self.j * self.q.1
    }

    /// Number of frequential wavelets per spin
    pub fn n_frequential(&self) -> usize {
        self.j_fr * self.q_fr
    }

    /// Number of joint scattering paths in the output
    pub fn n_paths(&self) -> usize {
        1 + self.n_second_order() * (1 + 2 * self.n_frequential())
    }
}

/// Configuration for the constant-Q transform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CqtConfig {
    pub sample_rate: u32,
    pub hop_length: usize,
    /// Centre frequency of the lowest bin (Hz)
    pub fmin: f32,
    pub n_bins: usize,
    pub bins_per_octave: usize,
}

impl Default for CqtConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAE_SAMPLE_RATE,
            hop_length: 512,
            fmin: 32.703_197, // C1
            n_bins: 84,
            bins_per_octave: 12,
        }
    }
}

impl CqtConfig {
    /// Quality factor shared by every bin
    pub fn q_factor(&self) -> f32 {
        1.0 / (2f32.powf(1.0 / self.bins_per_octave as f32) - 1.0)
    }

    /// Centre frequency of bin `k`
    pub fn bin_frequency(&self, k: usize) -> f32 {
        self.fmin * 2f32.powf(k as f32 / self.bins_per_octave as f32)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.hop_length == 0 || self.n_bins == 0 || self.bins_per_octave == 0 {
            return Err(AppError::Configuration(
                "CQT sample rate, hop length and bin counts must be positive".into(),
            ));
        }
        if !(self.fmin > 0.0) {
            return Err(AppError::Configuration(format!("fmin must be positive, got {}", self.fmin)));
        }
        // The top kernel's band, not only its centre, must stay below Nyquist
        let nyquist = self.sample_rate as f32 / 2.0;
        let fmax = self.bin_frequency(self.n_bins - 1);
        let band_edge = fmax * (1.0 + 0.5 / self.q_factor());
        if band_edge >= nyquist {
            return Err(AppError::Configuration(format!(
                "highest CQT bin ({:.1}Hz, band edge {:.1}Hz) exceeds Nyquist ({:.1}Hz)",
                fmax, band_edge, nyquist
            )));
        }
        Ok(())
    }
}

/// Configuration for the convolutional autoencoder extractor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaeConfig {
    /// Must equal [`CAE_SAMPLE_RATE`]
    pub sample_rate: u32,
    /// ONNX export of the pretrained two-branch network
    pub weights_path: PathBuf,
    pub hop_length: usize,
    pub fmin: f32,
    pub n_bins: usize,
    pub bins_per_octave: usize,
    /// Spectrogram columns per n-gram
    pub ngram_length: usize,
    /// Column stride between consecutive n-grams
    pub ngram_hop: usize,
    pub input_name: String,
    pub amplitude_output: String,
    pub phase_output: String,
}

impl Default for CaeConfig {
    fn default() -> Self {
        let cqt = CqtConfig::default();
        Self {
            sample_rate: CAE_SAMPLE_RATE,
            weights_path: PathBuf::from("models/cae.onnx"),
            hop_length: cqt.hop_length,
            fmin: cqt.fmin,
            n_bins: cqt.n_bins,
            bins_per_octave: cqt.bins_per_octave,
            ngram_length: 16,
            ngram_hop: 8,
            input_name: "cqt_ngram".to_string(),
            amplitude_output: "amplitude".to_string(),
            phase_output: "phase".to_string(),
        }
    }
}

impl CaeConfig {
    pub fn new(sample_rate: u32, weights_path: impl Into<PathBuf>) -> Self {
        Self {
            sample_rate,
            weights_path: weights_path.into(),
            ..Default::default()
        }
    }

    /// Constant-Q front end used by the autoencoder
    pub fn cqt(&self) -> CqtConfig {
        CqtConfig {
            sample_rate: self.sample_rate,
            hop_length: self.hop_length,
            fmin: self.fmin,
            n_bins: self.n_bins,
            bins_per_octave: self.bins_per_octave,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate != CAE_SAMPLE_RATE {
            return Err(AppError::Configuration(format!(
                "the autoencoder requires a sampling rate of {}Hz, got {}Hz",
                CAE_SAMPLE_RATE, self.sample_rate
            )));
        }
        if self.ngram_length == 0 || self.ngram_hop == 0 {
            return Err(AppError::Configuration(
                "n-gram length and hop must be positive".into(),
            ));
        }
        self.cqt().validate()
    }
}

/// Extractor selection, deserialized from `{"kind": "...", ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExtractorConfig {
    OpenL3(OpenL3Config),
    Mfcc(MfccConfig),
    Jtfs(JtfsConfig),
    Cae(CaeConfig),
}

impl ExtractorConfig {
    /// Load a configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            ExtractorConfig::OpenL3(c) => c.sample_rate,
            ExtractorConfig::Mfcc(c) => c.sample_rate,
            ExtractorConfig::Jtfs(c) => c.sample_rate,
            ExtractorConfig::Cae(c) => c.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cae_rejects_other_sample_rates() {
        let config = CaeConfig::new(44100, "does/not/exist.onnx");
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
        assert!(CaeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_openl3_embedding_size_checked() {
        assert!(OpenL3Config::new(48000, 0.1, 512).validate().is_ok());
        assert!(OpenL3Config::new(48000, 0.1, 128).validate().is_err());
        assert!(OpenL3Config::new(48000, 0.0, 512).validate().is_err());
    }

    #[test]
    fn test_cqt_above_nyquist_rejected() {
        let config = CqtConfig {
            sample_rate: 7000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_cqt_top_band_must_fit_below_nyquist() {
        // 84th bin centre is 3951Hz, below 4000Hz, but its band reaches ~4068Hz
        let config = CqtConfig {
            sample_rate: 8000,
            ..Default::default()
        };
        assert!(config.bin_frequency(config.n_bins - 1) < 4000.0);
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));

        let config = CqtConfig {
            sample_rate: 8200,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extractor_config_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jtfs.json");
        std::fs::write(&path, r#"{"kind": "jtfs", "j": 4, "t": 32}"#).unwrap();

        match ExtractorConfig::from_json_file(&path).unwrap() {
            ExtractorConfig::Jtfs(c) => {
                assert_eq!(c.j, 4);
                assert_eq!(c.t, 32);
                assert_eq!(c.q, JtfsConfig::default().q);
            }
            other => panic!("unexpected config {:?}", other),
        }

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ExtractorConfig::from_json_file(&path),
            Err(AppError::Serialization(_))
        ));
        assert!(matches!(
            ExtractorConfig::from_json_file(&dir.path().join("missing.json")),
            Err(AppError::Io(_))
        ));
    }

    #[test]
    fn test_extractor_config_from_json() {
        let json = r#"{"kind": "mfcc", "sample_rate": 22050, "hop_length": 512, "n_fft": 2048}"#;
        let config: ExtractorConfig = serde_json::from_str(json).unwrap();
        match config {
            ExtractorConfig::Mfcc(c) => {
                assert_eq!(c.sample_rate, 22050);
                assert_eq!(c.hop_length, 512);
                assert_eq!(c.n_mfcc, 20);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_jtfs_path_count() {
        let config = JtfsConfig::default();
        // 1 first-order path + 12 temporal wavelets x (phi_f + 2 spins x 16)
        assert_eq!(config.n_paths(), 1 + 12 * 33);
    }
}
