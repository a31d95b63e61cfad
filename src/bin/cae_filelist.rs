//! Select the autoencoder training files
//!
//! Run with: cargo run --bin cae_filelist -- --data-dir /data/mixes

use clap::Parser;
use std::path::PathBuf;
use timbretool_lib::dataset::{write_training_filelist, FileListConfig};

#[derive(Debug, Parser)]
#[command(name = "cae_filelist", about = "Sample audio files for autoencoder training")]
struct Args {
    /// Root holding <dataset>/<mix>/<file> audio
    #[arg(long, env = "TIMBRE_DATA_PATH")]
    data_dir: PathBuf,

    /// Number of files to select
    #[arg(long, default_value_t = 50)]
    count: usize,

    #[arg(long, default_value_t = 2024)]
    seed: u64,

    #[arg(long, default_value = "flac")]
    extension: String,

    /// File list name, written inside the data directory
    #[arg(long, default_value = "cae_training_filelist.txt")]
    output_name: String,
}

fn main() {
    timbretool_lib::init_logging();
    let args = Args::parse();

    let config = FileListConfig {
        data_dir: args.data_dir,
        extension: args.extension,
        sample_size: args.count,
        seed: args.seed,
        output_name: args.output_name,
    };

    match write_training_filelist(&config) {
        Ok(selection) => println!(
            "we select {} out of {} files as the training data -> {}",
            selection.selected.len(),
            selection.total,
            selection.output_path.display()
        ),
        Err(e) => {
            eprintln!("Failed to build the training file list: {}", e);
            std::process::exit(1);
        }
    }
}
