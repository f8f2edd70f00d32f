use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{PRESERVE, UNRESTRICTED},
    is_default,
    options::has_conflicting_directives,
};

use super::{
    deserialize_scalar, deserialize_scalar_or_list, validate_name, Ensure, ResourceKind,
    ResourceValidationError,
};

lazy_static! {
    static ref BOOT_PATH: Regex = Regex::new(r"^(/.*|:(default|preserve):)").unwrap();
    static ref ROOT_SPEC: Regex = Regex::new(r"\(.*\)").unwrap();
    static ref USER_SEPARATORS: Regex = Regex::new(r"\s|,|;|\||&").unwrap();
}

/// A boot menu entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MenuEntryDeclaration {
    /// Title of the entry.
    pub name: String,

    /// GRUB root device, e.g. `(hd0,msdos1)`. Ignored for BLS entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Kernel path, `:default:` or `:preserve:`.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub kernel: Option<String>,

    /// Kernel options, including merge directives.
    #[serde(
        default = "default_kernel_options",
        deserialize_with = "deserialize_kernel_options"
    )]
    pub kernel_options: Vec<String>,

    /// Multiboot modules. The first element of each module is its path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<Vec<String>>>,

    /// Initrd path, `:default:` or `:preserve:`.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub initrd: Option<String>,

    /// Make this entry the default boot entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_entry: Option<bool>,

    /// GRUB legacy only: add `makeactive` to the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makeactive: Option<bool>,

    /// Force the entry to be written as a BLS snippet or as a grub.d script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bls: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,

    /// Users allowed to boot the entry, or `unrestricted`.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub users: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_16bit: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_video: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    /// When creating an entry whose options contain `:preserve:`, seed the
    /// options from the default entry.
    #[serde(default = "default_true")]
    pub add_defaults_on_creation: bool,

    #[serde(default, skip_serializing_if = "is_default")]
    pub ensure: Ensure,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Default for MenuEntryDeclaration {
    fn default() -> Self {
        Self {
            name: String::new(),
            root: None,
            kernel: None,
            kernel_options: default_kernel_options(),
            modules: None,
            initrd: None,
            default_entry: None,
            makeactive: None,
            bls: None,
            classes: None,
            users: None,
            load_16bit: None,
            load_video: None,
            plugins: None,
            target: None,
            add_defaults_on_creation: true,
            ensure: Ensure::Present,
            provider: None,
        }
    }
}

fn default_kernel_options() -> Vec<String> {
    vec![PRESERVE.to_string()]
}

fn default_true() -> bool {
    true
}

fn deserialize_kernel_options<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(deserialize_scalar_or_list(deserializer)?.unwrap_or_else(default_kernel_options))
}

impl MenuEntryDeclaration {
    /// Declared users split on separators, `None` when every user may boot
    /// the entry.
    pub fn restricted_users(&self) -> Option<Vec<String>> {
        let users: Vec<String> = match &self.users {
            None => return None,
            Some(users) => users
                .iter()
                .flat_map(|u| USER_SEPARATORS.split(u.trim()))
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect(),
        };

        if users.iter().any(|u| u == UNRESTRICTED) {
            None
        } else {
            Some(users)
        }
    }

    pub fn has_modules(&self) -> bool {
        self.modules.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub(super) fn validate(&self) -> Result<(), ResourceValidationError> {
        validate_name(ResourceKind::GrubMenuentry, &self.name)?;
        let resource = || format!("{}[{}]", ResourceKind::GrubMenuentry, self.name);

        if has_conflicting_directives(&self.kernel_options) {
            return Err(ResourceValidationError::ConflictingDirectives {
                resource: resource(),
                property: "kernelOptions".into(),
            });
        }

        for (index, module) in self.modules.iter().flatten().enumerate() {
            let Some(path) = module.first() else {
                return Err(ResourceValidationError::EmptyModule {
                    resource: resource(),
                    index,
                });
            };
            if path.trim().is_empty() {
                return Err(ResourceValidationError::EmptyModule {
                    resource: resource(),
                    index,
                });
            }
            if !BOOT_PATH.is_match(path) {
                return Err(ResourceValidationError::InvalidModulePath {
                    resource: resource(),
                    path: path.clone(),
                });
            }
            if has_conflicting_directives(module) {
                return Err(ResourceValidationError::ConflictingDirectives {
                    resource: resource(),
                    property: format!("modules[{index}]"),
                });
            }
        }

        for (property, value) in [("kernel", &self.kernel), ("initrd", &self.initrd)] {
            if let Some(value) = value {
                if !BOOT_PATH.is_match(value) {
                    return Err(ResourceValidationError::InvalidBootPath {
                        resource: resource(),
                        property: property.into(),
                        value: value.clone(),
                    });
                }
            }
        }

        if let Some(root) = &self.root {
            if !ROOT_SPEC.is_match(root) {
                return Err(ResourceValidationError::InvalidRoot {
                    resource: resource(),
                    value: root.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> MenuEntryDeclaration {
        MenuEntryDeclaration {
            name: "Test Entry".into(),
            root: Some("(hd0,msdos1)".into()),
            kernel: Some(":default:".into()),
            initrd: Some("/initramfs.img".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let e = MenuEntryDeclaration::default();
        assert_eq!(e.kernel_options, vec![":preserve:"]);
        assert!(e.add_defaults_on_creation);
        assert_eq!(e.restricted_users(), None);
    }

    #[test]
    fn test_restricted_users() {
        let mut e = entry();
        e.users = Some(vec!["bob, alice".into(), "eve|mallory".into()]);
        assert_eq!(
            e.restricted_users(),
            Some(vec![
                "bob".to_string(),
                "alice".to_string(),
                "eve".to_string(),
                "mallory".to_string()
            ])
        );

        e.users = Some(vec!["bob".into(), "unrestricted".into()]);
        assert_eq!(e.restricted_users(), None);
    }

    #[test]
    fn test_validate() {
        entry().validate().unwrap();

        let mut e = entry();
        e.kernel_options = vec![":defaults:".into(), ":preserve:".into()];
        assert_eq!(
            e.validate().unwrap_err(),
            ResourceValidationError::ConflictingDirectives {
                resource: "grub_menuentry[Test Entry]".into(),
                property: "kernelOptions".into(),
            }
        );

        let mut e = entry();
        e.modules = Some(vec![
            vec!["/xen.gz".into(), "dom0_mem=512M".into()],
            vec![],
        ]);
        assert_eq!(
            e.validate().unwrap_err(),
            ResourceValidationError::EmptyModule {
                resource: "grub_menuentry[Test Entry]".into(),
                index: 1,
            }
        );

        let mut e = entry();
        e.modules = Some(vec![vec![
            "/vmlinuz".into(),
            ":preserve:".into(),
            ":defaults:".into(),
        ]]);
        assert!(matches!(
            e.validate().unwrap_err(),
            ResourceValidationError::ConflictingDirectives { property, .. } if property == "modules[0]"
        ));

        let mut e = entry();
        e.kernel = Some("vmlinuz".into());
        assert!(matches!(
            e.validate().unwrap_err(),
            ResourceValidationError::InvalidBootPath { property, .. } if property == "kernel"
        ));

        let mut e = entry();
        e.root = Some("hd0,msdos1".into());
        assert!(matches!(
            e.validate().unwrap_err(),
            ResourceValidationError::InvalidRoot { .. }
        ));
    }
}
