use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use log::{debug, trace};

use grubstate_api::error::{
    ExecutionEnvironmentMisconfigurationError, GrubStateError, ReportError, ServicingError,
};

use crate::{
    dependencies::{Dependency, DependencyResultExt},
    files,
    path::join_relative,
};

/// Mode of a grub.cfg written for the first time.
const GRUB_CFG_MODE: u32 = 0o600;

/// Locations where a rendered GRUB2 configuration may live, in order of
/// preference. `os_id` is the ID from os-release, used for the EFI vendor
/// directory.
pub fn config_candidates(os_id: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/etc/grub2.cfg"),
        PathBuf::from("/etc/grub2-efi.cfg"),
    ];
    if let Some(os_id) = os_id.filter(|id| !id.is_empty()) {
        candidates.push(PathBuf::from(format!(
            "/boot/efi/EFI/{}/grub.cfg",
            os_id.to_lowercase()
        )));
    }
    candidates.push(PathBuf::from("/boot/grub2/grub.cfg"));
    candidates.push(PathBuf::from("/boot/grub/grub.cfg"));
    candidates
}

/// Whether the file only redirects to another configuration, as done by the
/// stub grub.cfg on the EFI partition of newer distributions.
fn is_redirect_stub(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .any(|line| line.trim_start().starts_with("configfile")),
        Err(_) => true,
    }
}

/// Returns every existing, distinct grub.cfg under `root` that mkconfig
/// output should be written to.
pub fn discover_configs(root: &Path, os_id: Option<&str>) -> Result<Vec<PathBuf>, GrubStateError> {
    let candidates = config_candidates(os_id);
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for candidate in &candidates {
        let path = join_relative(root, candidate);
        let Ok(resolved) = path.canonicalize() else {
            continue;
        };
        if resolved.is_dir() || !seen.insert(resolved.clone()) {
            continue;
        }
        if is_redirect_stub(&resolved) {
            trace!("Skipping '{}': not a full GRUB configuration", resolved.display());
            continue;
        }
        found.push(resolved);
    }

    if found.is_empty() {
        return Err(GrubStateError::new(
            ExecutionEnvironmentMisconfigurationError::NoGrubConfig {
                paths: candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join("', '"),
            },
        ));
    }

    debug!("Found GRUB configuration files: {found:?}");
    Ok(found)
}

/// Runs grub2-mkconfig, or grub-mkconfig where that is what the distribution
/// ships, and returns the rendered configuration.
pub fn generate(update_bls_cmdline: bool) -> Result<String, GrubStateError> {
    let dependency =
        Dependency::first_available(&[Dependency::Grub2Mkconfig, Dependency::GrubMkconfig])
            .unwrap_or(Dependency::Grub2Mkconfig);

    let mut cmd = dependency.cmd();
    if update_bls_cmdline {
        cmd.arg("--update-bls-cmdline");
    }
    cmd.output_and_check()
        .message("Failed to generate the GRUB configuration")
}

/// Writes mkconfig output to every given configuration file.
pub fn write_configs(paths: &[PathBuf], output: &str) -> Result<(), GrubStateError> {
    if output.trim().is_empty() {
        return Err(GrubStateError::new(ServicingError::EmptyMkconfigOutput));
    }

    let mut content = output.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }

    for path in paths {
        debug!("Writing GRUB configuration to '{}'", path.display());
        files::replace_file(path, GRUB_CFG_MODE, content.as_bytes()).structured(
            ServicingError::WriteFile {
                path: path.display().to_string(),
            },
        )?;
    }

    Ok(())
}
