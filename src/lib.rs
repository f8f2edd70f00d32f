use std::path::Path;

use log::debug;

use grubstate_api::{
    config::Manifest,
    error::{GrubStateError, InvalidInputError, ReportError},
};

pub mod cli;
pub mod engine;
pub mod facts;
pub mod kernel_params;
pub mod menuentry;
pub mod options;
pub mod providers;
pub mod tools;
pub mod users;

mod logging;

pub use engine::{ResourceReport, RunContext};
pub use logging::{background_log::BackgroundLog, multilog::MultiLogger};

/// grubstate version as provided by cargo.
pub const GRUBSTATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reads and parses the manifest at `path`.
pub fn load_manifest(path: &Path) -> Result<Manifest, GrubStateError> {
    let contents = std::fs::read_to_string(path).structured(InvalidInputError::LoadManifest {
        path: path.display().to_string(),
    })?;
    let manifest =
        Manifest::from_yaml(&contents).structured(InvalidInputError::ParseManifest)?;
    debug!(
        "Loaded {} resource(s) from '{}'",
        manifest.resources.len(),
        path.display()
    );
    Ok(manifest)
}
