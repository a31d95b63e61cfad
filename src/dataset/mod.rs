pub mod filelist;

pub use filelist::{collect_audio_files, sample_files, write_training_filelist, FileListConfig, Selection};
