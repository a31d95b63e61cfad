pub mod audio;
pub mod dataset;
pub mod error;
pub mod extractor;

pub use error::{AppError, Result};
pub use extractor::{DynamicExtractor, ExtractorConfig, ExtractorKind, FeatureExtractor};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the console logger; `RUST_LOG` overrides the default filter
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("timbretool_lib=info,timbretool=info,cae_filelist=info"));

    // A second call (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
