//! Training file selection for the autoencoder
//!
//! Scans `<data_dir>/<dataset>/<mix>/<file>` for audio with a given
//! extension, draws a seeded sample without replacement and writes the
//! chosen paths, one per line, next to the data.

use crate::error::{AppError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Depth of audio files below the data directory (dataset / mix / file)
const FILE_DEPTH: usize = 3;

/// Parameters of one file-list selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListConfig {
    pub data_dir: PathBuf,
    pub extension: String,
    pub sample_size: usize,
    pub seed: u64,
    pub output_name: String,
}

impl FileListConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            extension: "flac".to_string(),
            sample_size: 50,
            seed: 2024,
            output_name: "cae_training_filelist.txt".to_string(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.data_dir.join(&self.output_name)
    }
}

/// Outcome of a selection run
#[derive(Debug, Clone)]
pub struct Selection {
    /// Number of candidate files found
    pub total: usize,
    pub selected: Vec<PathBuf>,
    pub output_path: PathBuf,
}

/// Find candidate audio files, in file-name order at every level
pub fn collect_audio_files(data_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !data_dir.is_dir() {
        return Err(AppError::Configuration(format!(
            "data directory not found: {:?}",
            data_dir
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(data_dir)
        .min_depth(FILE_DEPTH)
        .max_depth(FILE_DEPTH)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                let matches = path.extension().and_then(|e| e.to_str()) == Some(extension);
                if entry.file_type().is_file() && matches {
                    files.push(path.to_path_buf());
                }
            }
            Err(e) => warn!("Error accessing entry: {}", e),
        }
    }

    debug!("Found {} .{} files under {:?}", files.len(), extension, data_dir);
    Ok(files)
}

/// Draw `sample_size` distinct files using a generator seeded with `seed`
pub fn sample_files(files: &[PathBuf], sample_size: usize, seed: u64) -> Result<Vec<PathBuf>> {
    if sample_size > files.len() {
        return Err(AppError::Configuration(format!(
            "cannot select {} files out of {}",
            sample_size,
            files.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    Ok(rand::seq::index::sample(&mut rng, files.len(), sample_size)
        .into_iter()
        .map(|i| files[i].clone())
        .collect())
}

/// Scan, sample and write the training file list
pub fn write_training_filelist(config: &FileListConfig) -> Result<Selection> {
    let files = collect_audio_files(&config.data_dir, &config.extension)?;
    let selected = sample_files(&files, config.sample_size, config.seed)?;
    info!(
        "Selected {} out of {} files as training data",
        selected.len(),
        files.len()
    );

    let output_path = config.output_path();
    let mut writer = BufWriter::new(File::create(&output_path)?);
    for path in &selected {
        writeln!(writer, "{}", path.display())?;
    }
    writer.flush()?;
    info!("Wrote file list to {:?}", output_path);

    Ok(Selection {
        total: files.len(),
        selected,
        output_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_tree(root: &Path, datasets: usize, mixes: usize, files: usize) {
        for d in 0..datasets {
            for m in 0..mixes {
                let dir = root.join(format!("dataset{}", d)).join(format!("mix{}", m));
                fs::create_dir_all(&dir).unwrap();
                for f in 0..files {
                    fs::write(dir.join(format!("track{}.flac", f)), b"").unwrap();
                }
                fs::write(dir.join("notes.txt"), b"").unwrap();
            }
        }
        // Files outside the dataset/mix layout are ignored
        fs::write(root.join("stray.flac"), b"").unwrap();
    }

    #[test]
    fn test_collects_only_matching_files_at_depth() {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path(), 2, 3, 4);
        let files = collect_audio_files(dir.path(), "flac").unwrap();
        assert_eq!(files.len(), 2 * 3 * 4);
        assert!(files.iter().all(|p| p.extension().unwrap() == "flac"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dataset_is_scanned() {
        let data = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        make_tree(data.path(), 1, 2, 2);
        make_tree(elsewhere.path(), 1, 1, 3);
        std::os::unix::fs::symlink(elsewhere.path().join("dataset0"), data.path().join("linked")).unwrap();

        let files = collect_audio_files(data.path(), "flac").unwrap();
        assert_eq!(files.len(), 2 * 2 + 3);
        assert!(files.iter().any(|p| p.starts_with(data.path().join("linked"))));
    }

    #[test]
    fn test_same_seed_gives_identical_output() {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path(), 3, 4, 5);
        let config = FileListConfig {
            sample_size: 10,
            ..FileListConfig::new(dir.path())
        };

        let first = write_training_filelist(&config).unwrap();
        let first_bytes = fs::read(&first.output_path).unwrap();
        let second = write_training_filelist(&config).unwrap();
        let second_bytes = fs::read(&second.output_path).unwrap();

        assert_eq!(first.total, 60);
        assert_eq!(first.selected.len(), 10);
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(String::from_utf8(first_bytes).unwrap().lines().count(), 10);
    }

    #[test]
    fn test_selection_has_no_duplicates() {
        let files: Vec<PathBuf> = (0..100).map(|i| PathBuf::from(format!("{}.flac", i))).collect();
        let mut selected = sample_files(&files, 50, 2024).unwrap();
        selected.sort();
        selected.dedup();
        assert_eq!(selected.len(), 50);
    }

    #[test]
    fn test_too_few_files_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        make_tree(dir.path(), 1, 1, 3);
        let config = FileListConfig::new(dir.path());
        let err = write_training_filelist(&config).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(!config.output_path().exists());
    }

    #[test]
    fn test_missing_directory_rejected() {
        let err = collect_audio_files(Path::new("/nonexistent/data"), "flac").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
