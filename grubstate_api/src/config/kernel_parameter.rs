use std::{path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::is_default;

use super::{
    deserialize_scalar_or_list, validate_name, Ensure, ResourceKind, ResourceValidationError,
};

/// Which boots a kernel parameter applies to.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Bootmode {
    /// Every boot, including recovery.
    #[default]
    All,
    /// The default boot entry.
    Default,
    /// Every non-recovery boot.
    Normal,
    /// Recovery boots only.
    Recovery,
}

/// A kernel command line parameter.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KernelParameterDeclaration {
    /// Parameter name. `name:bootmode` is accepted when `bootmode` is not
    /// given.
    pub name: String,

    /// Values of the parameter. Absent for a bare flag like `quiet`.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootmode: Option<Bootmode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub ensure: Ensure,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl KernelParameterDeclaration {
    /// Splits the declared name into the parameter name and the bootmode,
    /// honoring the `name:bootmode` form.
    pub fn identity(&self) -> (&str, Option<Bootmode>) {
        if self.bootmode.is_some() {
            return (&self.name, self.bootmode);
        }

        match self.name.split_once(':') {
            Some((name, bootmode)) => match Bootmode::from_str(bootmode) {
                Ok(bootmode) => (name, Some(bootmode)),
                Err(_) => (&self.name, None),
            },
            None => (&self.name, None),
        }
    }

    /// Name of the parameter on the kernel command line.
    pub fn param_name(&self) -> &str {
        self.identity().0
    }

    pub fn bootmode(&self) -> Bootmode {
        self.identity().1.unwrap_or_default()
    }

    /// Declared values, with an empty list treated like a bare flag.
    pub fn values(&self) -> Option<&[String]> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    pub(super) fn validate(&self) -> Result<(), ResourceValidationError> {
        validate_name(ResourceKind::KernelParameter, &self.name)?;

        if self.bootmode.is_none() {
            if let Some((_, bootmode)) = self.name.split_once(':') {
                if Bootmode::from_str(bootmode).is_err() {
                    return Err(ResourceValidationError::InvalidBootmode {
                        resource: format!("{}[{}]", ResourceKind::KernelParameter, self.name),
                        bootmode: bootmode.into(),
                        expected: Bootmode::iter()
                            .map(|b| b.to_string())
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
            }
        }

        validate_name(ResourceKind::KernelParameter, self.param_name())?;

        if let Some(values) = &self.value {
            if values.iter().any(|v| v.trim().is_empty()) {
                return Err(ResourceValidationError::EmptyValue {
                    resource: format!("{}[{}]", ResourceKind::KernelParameter, self.name),
                });
            }
        }

        Ok(())
    }
}
