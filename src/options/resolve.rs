use std::collections::BTreeMap;

use grubstate_api::{
    constants::{DEFAULT, PRESERVE},
    error::{GrubStateError, MissingDefaultError, ReportError},
};

/// Resolves a declared kernel or initrd path.
///
/// `:preserve:` keeps the current value, falling back to `:default:` when
/// there is none. `:default:` takes the `flavor` field of the default boot
/// entry; a leading `/boot` component is dropped since GRUB addresses files
/// relative to the boot partition.
pub fn resolve(
    current: Option<&str>,
    desired: &str,
    defaults: &BTreeMap<String, String>,
    flavor: &str,
) -> Result<String, GrubStateError> {
    let desired = match desired {
        PRESERVE => match current.filter(|c| !c.is_empty()) {
            Some(current) => return Ok(current.to_string()),
            None => DEFAULT,
        },
        other => other,
    };

    if desired != DEFAULT {
        return Ok(desired.to_string());
    }

    let value = defaults
        .get(flavor)
        .structured(MissingDefaultError::NoDefaultValue {
            flavor: flavor.to_string(),
        })?;

    let mut segments: Vec<&str> = value.split('/').collect();
    if segments.get(1) == Some(&"boot") {
        segments.remove(1);
    }
    Ok(segments.join("/"))
}
