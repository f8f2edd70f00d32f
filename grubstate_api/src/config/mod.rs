use std::path::Path;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use strum_macros::{Display, IntoStaticStr};

mod error;
mod grub_config;
mod grub_user;
mod kernel_parameter;
mod menu_entry;

pub use error::ResourceValidationError;
pub use grub_config::GrubConfigDeclaration;
pub use grub_user::GrubUserDeclaration;
pub use kernel_parameter::{Bootmode, KernelParameterDeclaration};
pub use menu_entry::MenuEntryDeclaration;

/// The set of resources to bring the host in line with.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
}

impl Manifest {
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }
}

/// Whether a resource should exist.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// The kinds of resources that can be declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoStaticStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    KernelParameter,
    GrubConfig,
    GrubMenuentry,
    GrubUser,
}

impl ResourceKind {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// A single declared resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceDeclaration {
    GrubConfig(GrubConfigDeclaration),
    KernelParameter(KernelParameterDeclaration),
    GrubMenuentry(MenuEntryDeclaration),
    GrubUser(GrubUserDeclaration),
}

impl ResourceDeclaration {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::GrubConfig(_) => ResourceKind::GrubConfig,
            Self::KernelParameter(_) => ResourceKind::KernelParameter,
            Self::GrubMenuentry(_) => ResourceKind::GrubMenuentry,
            Self::GrubUser(_) => ResourceKind::GrubUser,
        }
    }

    /// Human readable identity, e.g. `kernel_parameter[quiet:all]`.
    pub fn title(&self) -> String {
        let name = match self {
            Self::GrubConfig(r) => r.name.clone(),
            Self::KernelParameter(r) => {
                let (name, bootmode) = r.identity();
                match bootmode {
                    Some(bootmode) => format!("{name}:{bootmode}"),
                    None => r.name.clone(),
                }
            }
            Self::GrubMenuentry(r) => r.name.clone(),
            Self::GrubUser(r) => r.name.clone(),
        };
        format!("{}[{}]", self.kind(), name)
    }

    pub fn ensure(&self) -> Ensure {
        match self {
            Self::GrubConfig(r) => r.ensure,
            Self::KernelParameter(r) => r.ensure,
            Self::GrubMenuentry(r) => r.ensure,
            Self::GrubUser(r) => r.ensure,
        }
    }

    /// Explicitly requested provider, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::GrubConfig(r) => r.provider.as_deref(),
            Self::KernelParameter(r) => r.provider.as_deref(),
            Self::GrubMenuentry(r) => r.provider.as_deref(),
            Self::GrubUser(r) => r.provider.as_deref(),
        }
    }

    /// Explicitly requested target file, if any.
    pub fn target(&self) -> Option<&Path> {
        match self {
            Self::GrubConfig(r) => r.target.as_deref(),
            Self::KernelParameter(r) => r.target.as_deref(),
            Self::GrubMenuentry(r) => r.target.as_deref(),
            Self::GrubUser(r) => r.target.as_deref(),
        }
    }

    pub fn validate(&self) -> Result<(), ResourceValidationError> {
        if let Some(target) = self.target() {
            if !target.is_absolute() {
                return Err(ResourceValidationError::RelativeTarget {
                    resource: self.title(),
                    target: target.display().to_string(),
                });
            }
        }

        match self {
            Self::GrubConfig(r) => r.validate(),
            Self::KernelParameter(r) => r.validate(),
            Self::GrubMenuentry(r) => r.validate(),
            Self::GrubUser(r) => r.validate(),
        }
    }
}

pub(crate) fn validate_name(kind: ResourceKind, name: &str) -> Result<(), ResourceValidationError> {
    if name.trim().is_empty() {
        return Err(ResourceValidationError::EmptyName {
            kind: kind.to_string(),
        });
    }
    Ok(())
}

fn scalar_to_string<E: de::Error>(value: Value) -> Result<String, E> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(E::custom(format!("expected a scalar value, found {other:?}"))),
    }
}

/// Accepts a scalar (string, number or boolean) as a string.
pub(crate) fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_to_string(value).map(Some),
    }
}

/// Accepts either a single scalar or a list of scalars.
pub(crate) fn deserialize_scalar_or_list<'de, D>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(items)) => items
            .into_iter()
            .map(scalar_to_string)
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(value) => scalar_to_string(value).map(|s| Some(vec![s])),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_yaml(indoc! {r#"
            resources:
              - kind: grub-config
                name: GRUB_TIMEOUT
                value: 5
              - kind: kernel-parameter
                name: elevator
                value: [noop, deadline]
                bootmode: default
              - kind: kernel-parameter
                name: "quiet:normal"
                ensure: absent
              - kind: grub-menuentry
                name: Managed Entry
                root: (hd0,msdos1)
                kernel: ":default:"
                kernelOptions: [":defaults:", "console=ttyS0"]
                initrd: ":default:"
                load16bit: false
              - kind: grub-user
                name: root
                password: secret
                superuser: true
        "#})
        .unwrap();

        assert_eq!(manifest.resources.len(), 5);
        assert_eq!(manifest.resources[0].title(), "grub_config[GRUB_TIMEOUT]");
        match &manifest.resources[0] {
            ResourceDeclaration::GrubConfig(r) => assert_eq!(r.value.as_deref(), Some("5")),
            _ => panic!("unexpected kind"),
        }
        assert_eq!(
            manifest.resources[1].title(),
            "kernel_parameter[elevator:default]"
        );
        assert_eq!(
            manifest.resources[2].title(),
            "kernel_parameter[quiet:normal]"
        );
        assert_eq!(manifest.resources[2].ensure(), Ensure::Absent);
        match &manifest.resources[3] {
            ResourceDeclaration::GrubMenuentry(r) => {
                assert_eq!(r.load_16bit, Some(false));
                assert_eq!(r.kernel_options, vec![":defaults:", "console=ttyS0"]);
                assert!(r.add_defaults_on_creation);
            }
            _ => panic!("unexpected kind"),
        }
        for resource in &manifest.resources {
            resource.validate().unwrap();
        }
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Manifest::from_yaml(indoc! {r#"
            resources:
              - kind: grub-config
                name: GRUB_TIMEOUT
                valeu: 5
        "#})
        .unwrap_err();

        Manifest::from_yaml(indoc! {r#"
            resources:
              - kind: grub-bootloader
                name: GRUB_TIMEOUT
        "#})
        .unwrap_err();
    }

    #[test]
    fn test_password_must_be_string() {
        Manifest::from_yaml(indoc! {r#"
            resources:
              - kind: grub-user
                name: root
                password: 1234
        "#})
        .unwrap_err();
    }

    #[test]
    fn test_relative_target() {
        let manifest = Manifest::from_yaml(indoc! {r#"
            resources:
              - kind: grub-config
                name: GRUB_TIMEOUT
                value: 5
                target: etc/default/grub
        "#})
        .unwrap();
        assert_eq!(
            manifest.resources[0].validate().unwrap_err(),
            ResourceValidationError::RelativeTarget {
                resource: "grub_config[GRUB_TIMEOUT]".into(),
                target: "etc/default/grub".into(),
            }
        );
    }
}
