use lazy_static::lazy_static;
use regex::Regex;

use grubstate_api::constants::MANAGED_MARKER;

use super::{AuthorizedUsers, MenuEntry};

lazy_static! {
    static ref KERNEL_VERSION: Regex = Regex::new(r"(\d.+)").unwrap();
}

const MULTIBOOT2: &str = "multiboot2";

/// Extracts the version of a kernel from its path, e.g. `5.14.0-427.el9` out
/// of `/vmlinuz-5.14.0-427.el9`. Kernels without a digit fall back to their
/// path without slashes.
pub fn bls_version(kernel: &str) -> String {
    match KERNEL_VERSION.captures(kernel) {
        Some(captures) => captures[1].to_string(),
        None => kernel.replace('/', ""),
    }
}

fn join_nonempty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn menuentry_line(entry: &MenuEntry) -> String {
    let mut parts = vec![format!("menuentry '{}'", entry.name)];
    parts.extend(entry.classes.iter().map(|c| format!("--class {c}")));
    match entry.users {
        AuthorizedUsers::Unrestricted => parts.push("--unrestricted".into()),
        AuthorizedUsers::Restricted(ref users) if !users.is_empty() => {
            parts.push(format!("--users {}", users.join(",")))
        }
        AuthorizedUsers::Restricted(_) => {}
    }
    parts.push("{".into());
    parts.join(" ")
}

/// Renders a menu entry as a /etc/grub.d script. grub2-mkconfig copies
/// everything from the third line on into grub.cfg, so the managed marker
/// ends up right above the entry.
pub fn emit_legacy(entry: &MenuEntry, efi: bool) -> String {
    let mut lines = vec![
        "#!/bin/sh".to_string(),
        "exec tail -n +3 $0".to_string(),
        MANAGED_MARKER.to_string(),
        menuentry_line(entry),
    ];

    if entry.load_video {
        lines.push("  load_video".into());
    }
    lines.extend(entry.plugins.iter().map(|p| format!("  insmod {p}")));

    let multiboot = !entry.modules.is_empty();
    if multiboot && efi && !entry.plugins.iter().any(|p| p == MULTIBOOT2) {
        lines.push(format!("  insmod {MULTIBOOT2}"));
    }

    if let Some(ref root) = entry.root {
        lines.push(format!("  set root='{root}'"));
    }

    let kernel = entry.kernel.as_deref().unwrap_or_default();
    let options = entry.kernel_options.join(" ");
    if multiboot {
        lines.push(format!(
            "  {}",
            join_nonempty(["multiboot", kernel, options.as_str()])
        ));
        lines.extend(
            entry
                .modules
                .iter()
                .map(|module| format!("  module {}", module.join(" "))),
        );
    } else {
        let (linux, initrd) = if entry.load_16bit {
            ("linux16", "initrd16")
        } else {
            ("linux", "initrd")
        };
        lines.push(format!(
            "  {}",
            join_nonempty([linux, kernel, options.as_str()])
        ));
        if let Some(ref path) = entry.initrd {
            lines.push(format!("  {initrd} {path}"));
        }
    }

    lines.push("}".into());
    lines.join("\n") + "\n"
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values
}

/// Renders a menu entry as a BLS snippet. `id` is the full entry
/// identifier and `version` the kernel version the snippet is named after.
pub fn emit_bls(entry: &MenuEntry, id: &str, version: &str) -> String {
    let mut lines = vec![
        MANAGED_MARKER.to_string(),
        format!("title {}", entry.name),
        format!("version {version}"),
    ];
    if let Some(ref kernel) = entry.kernel {
        lines.push(format!("linux {kernel}"));
    }
    if let Some(ref initrd) = entry.initrd {
        lines.push(format!("initrd {initrd}"));
    }
    lines.push(join_nonempty(["options", entry.kernel_options.join(" ").as_str()]));
    lines.push(format!("id {id}-{version}"));

    match entry.users {
        AuthorizedUsers::Restricted(ref users) if !users.is_empty() => {
            lines.push(format!("grub_users {}", sorted(users).join(" ")));
        }
        AuthorizedUsers::Unrestricted => {
            lines.push("grub_arg --unrestricted".into());
            lines.push("grub_users $grub_users".into());
        }
        AuthorizedUsers::Restricted(_) => lines.push("grub_users $grub_users".into()),
    }

    lines.extend(sorted(&entry.args).into_iter().map(|a| format!("grub_arg {a}")));
    lines.extend(
        sorted(&entry.classes)
            .into_iter()
            .map(|c| format!("grub_class {c}")),
    );

    lines.join("\n") + "\n"
}
