use std::collections::BTreeMap;

use log::{debug, trace};

use grubstate_api::error::{GrubStateError, ServicingError};

use crate::dependencies::{Dependency, DependencyError};

/// Parses `grubby --info` output into a map of field to value. Values have
/// their surrounding quotes removed.
pub fn parse_info(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn info(target: &str) -> Result<BTreeMap<String, String>, Box<DependencyError>> {
    let output = Dependency::Grubby
        .cmd()
        .with_arg(format!("--info={target}"))
        .output_and_check()?;
    Ok(parse_info(&output))
}

/// Returns the fields of the default boot entry as reported by grubby.
///
/// On GRUB legacy systems the entry is looked up directly. GRUB2 first asks
/// for the index of the default entry and then for its details. Any failure
/// yields an empty map so that callers can report the missing default
/// themselves.
pub fn default_info(legacy: bool) -> BTreeMap<String, String> {
    let result = if legacy {
        info("DEFAULT")
    } else {
        Dependency::Grubby
            .cmd()
            .with_arg("--default-index")
            .output_and_check()
            .and_then(|index| info(index.trim()))
    };

    match result {
        Ok(fields) => {
            trace!("Default boot entry: {fields:?}");
            fields
        }
        Err(e) => {
            debug!("Could not query the default boot entry: {e}");
            BTreeMap::new()
        }
    }
}

/// Makes `entry` the saved default boot entry. Entries inside submenus are
/// addressed as `submenu>entry`.
pub fn set_default(entry: &str) -> Result<(), GrubStateError> {
    debug!("Setting default boot entry to '{entry}'");
    Dependency::Grub2SetDefault
        .cmd()
        .with_arg(entry)
        .run_and_check()
        .map_err(|e| {
            GrubStateError::with_source(
                ServicingError::SetDefaultEntry {
                    entry: entry.to_string(),
                },
                (*e).into(),
            )
        })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use maplit::btreemap;

    use super::*;

    #[test]
    fn test_parse_info() {
        let output = indoc! {r#"
            index=0
            kernel="/boot/vmlinuz-5.14.0-427.el9.x86_64"
            args="ro crashkernel=1G-4G:192M rhgb quiet"
            root="UUID=1234"
            initrd="/boot/initramfs-5.14.0-427.el9.x86_64.img"
            title="Red Hat Enterprise Linux (5.14.0-427.el9.x86_64) 9.4 (Plow)"
            id="abcd-5.14.0-427.el9.x86_64"
            garbage
        "#};

        let info = parse_info(output);
        assert_eq!(info.len(), 7);
        assert_eq!(info["kernel"], "/boot/vmlinuz-5.14.0-427.el9.x86_64");
        assert_eq!(info["args"], "ro crashkernel=1G-4G:192M rhgb quiet");
        assert_eq!(info["root"], "UUID=1234");
        assert_eq!(
            info["title"],
            "Red Hat Enterprise Linux (5.14.0-427.el9.x86_64) 9.4 (Plow)"
        );
    }

    #[test]
    fn test_parse_info_legacy() {
        let output = "index=0\nkernel=/vmlinuz-2.6.32\nargs=\"ro quiet\"\nroot=/dev/sda2\n";
        assert_eq!(
            parse_info(output),
            btreemap! {
                "index".into() => "0".into(),
                "kernel".into() => "/vmlinuz-2.6.32".into(),
                "args".into() => "ro quiet".into(),
                "root".into() => "/dev/sda2".into(),
            }
        );
    }
}
