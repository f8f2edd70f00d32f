use std::path::Path;

use grubstate_api::{
    config::{Bootmode, ResourceDeclaration},
    constants::{ETC_DEFAULT_GRUB, GRUB_CMDLINE_LINUX, GRUB_CMDLINE_LINUX_DEFAULT},
    error::{GrubStateError, InvalidInputError},
};

/// The kernel command line variable a kernel parameter of `bootmode` lives
/// in.
fn cmdline_variable(bootmode: Bootmode) -> Option<&'static str> {
    match bootmode {
        Bootmode::All => Some(GRUB_CMDLINE_LINUX),
        Bootmode::Default | Bootmode::Normal => Some(GRUB_CMDLINE_LINUX_DEFAULT),
        Bootmode::Recovery => None,
    }
}

fn target_of(resource: &ResourceDeclaration) -> &Path {
    resource.target().unwrap_or(Path::new(ETC_DEFAULT_GRUB))
}

/// Fails when a `grub_config` resource manages a kernel command line
/// variable that `kernel_parameter` resources edit in the same file.
pub fn check(resources: &[ResourceDeclaration]) -> Result<(), GrubStateError> {
    for config in resources {
        let ResourceDeclaration::GrubConfig(ref declaration) = config else {
            continue;
        };

        for param in resources {
            let ResourceDeclaration::KernelParameter(ref parameter) = param else {
                continue;
            };

            if cmdline_variable(parameter.bootmode()) == Some(declaration.name.as_str())
                && target_of(config) == target_of(param)
            {
                return Err(GrubStateError::new(InvalidInputError::ResourceConflict {
                    first: config.title(),
                    second: param.title(),
                    variable: declaration.name.clone(),
                    target: target_of(config).display().to_string(),
                }));
            }
        }
    }

    Ok(())
}
