//! Extract timbre features from an audio file
//!
//! Run with: cargo run -- track.wav --kind mfcc --output features.json

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use timbretool_lib::audio::{duration_ms, load_audio_file, resample};
use timbretool_lib::{DynamicExtractor, ExtractorConfig, ExtractorKind, FeatureExtractor};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Openl3,
    Mfcc,
    Jtfs,
    Cae,
}

impl From<Kind> for ExtractorKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Openl3 => ExtractorKind::OpenL3,
            Kind::Mfcc => ExtractorKind::Mfcc,
            Kind::Jtfs => ExtractorKind::Jtfs,
            Kind::Cae => ExtractorKind::Cae,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "timbretool", about = "Extract timbre features from an audio file")]
struct Args {
    /// Audio file (wav, flac, mp3, ogg, m4a)
    audio: PathBuf,

    /// Extractor to run with its default configuration
    #[arg(long, value_enum, default_value = "mfcc")]
    kind: Kind,

    /// JSON extractor configuration; overrides --kind
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the feature array as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct FeatureDump<'a> {
    extractor: &'a str,
    shape: &'a [usize],
    data: Vec<f32>,
}

fn run(args: Args) -> timbretool_lib::Result<()> {
    let config = match &args.config {
        Some(path) => ExtractorConfig::from_json_file(path)?,
        None => ExtractorKind::from(args.kind).default_config(),
    };
    let extractor = DynamicExtractor::from_config(&config)?;

    let (samples, source_rate) = load_audio_file(&args.audio)?;
    info!(
        "Loaded {:?}: {} samples ({} ms) at {}Hz",
        args.audio,
        samples.len(),
        duration_ms(&samples, source_rate),
        source_rate
    );
    let samples = resample(&samples, source_rate, extractor.sample_rate())?;

    let features = extractor.extract_samples(&samples)?;
    info!("{} features: shape {:?}", extractor.name(), features.shape());

    if let Some(output) = &args.output {
        let dump = FeatureDump {
            extractor: extractor.kind().display_name(),
            shape: features.shape(),
            data: features.iter().copied().collect(),
        };
        let file = std::fs::File::create(output)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &dump)?;
        info!("Wrote features to {:?}", output);
    }

    println!("{:?}", features.shape());
    Ok(())
}

fn main() {
    timbretool_lib::init_logging();

    if let Err(e) = run(Args::parse()) {
        error!("{}", e);
        std::process::exit(1);
    }
}
