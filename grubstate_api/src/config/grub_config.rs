use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::is_default;

use super::{deserialize_scalar, validate_name, Ensure, ResourceKind, ResourceValidationError};

/// A global GRUB setting, e.g. `GRUB_TIMEOUT` in `/etc/default/grub` or
/// `timeout` in a legacy `menu.lst`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrubConfigDeclaration {
    /// Name of the setting.
    pub name: String,

    /// Value of the setting. Settings like `hiddenmenu` carry no value.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,

    /// File to edit instead of the provider's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub ensure: Ensure,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl GrubConfigDeclaration {
    pub(super) fn validate(&self) -> Result<(), ResourceValidationError> {
        validate_name(ResourceKind::GrubConfig, &self.name)
    }
}
