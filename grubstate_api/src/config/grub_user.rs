use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{constants::DEFAULT_PBKDF2_ROUNDS, is_default};

use super::{validate_name, Ensure, ResourceKind, ResourceValidationError};

lazy_static! {
    static ref USERNAME_SEPARATORS: Regex = Regex::new(r"\s|,|;|&|\|").unwrap();
}

/// A GRUB2 user allowed to unlock the menu or restricted entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GrubUserDeclaration {
    /// Username.
    pub name: String,

    /// Plaintext password, or an existing `grub.pbkdf2.sha512...` hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Add the user to the `superusers` list.
    #[serde(default, skip_serializing_if = "is_default")]
    pub superuser: bool,

    /// Managed users script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    /// Warn about users in the active configuration that are not declared.
    #[serde(default, skip_serializing_if = "is_default")]
    pub report_unmanaged: bool,

    /// PBKDF2 iterations used when hashing a plaintext password.
    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Drop users from the managed script that are not declared.
    #[serde(default, skip_serializing_if = "is_default")]
    pub purge: bool,

    #[serde(default, skip_serializing_if = "is_default")]
    pub ensure: Ensure,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Default for GrubUserDeclaration {
    fn default() -> Self {
        Self {
            name: String::new(),
            password: None,
            superuser: false,
            target: None,
            report_unmanaged: false,
            rounds: DEFAULT_PBKDF2_ROUNDS,
            purge: false,
            ensure: Ensure::Present,
            provider: None,
        }
    }
}

fn default_rounds() -> u32 {
    DEFAULT_PBKDF2_ROUNDS
}

impl GrubUserDeclaration {
    pub(super) fn validate(&self) -> Result<(), ResourceValidationError> {
        validate_name(ResourceKind::GrubUser, &self.name)?;

        if USERNAME_SEPARATORS.is_match(&self.name) {
            return Err(ResourceValidationError::InvalidUsername {
                name: self.name.clone(),
            });
        }

        if self.rounds == 0 {
            return Err(ResourceValidationError::InvalidRounds {
                name: self.name.clone(),
            });
        }

        if self.ensure == Ensure::Present {
            match &self.password {
                None => {
                    return Err(ResourceValidationError::MissingPassword {
                        name: self.name.clone(),
                    })
                }
                Some(p) if p.is_empty() => {
                    return Err(ResourceValidationError::EmptyPassword {
                        name: self.name.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> GrubUserDeclaration {
        GrubUserDeclaration {
            name: name.into(),
            password: Some("secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_username() {
        user("root").validate().unwrap();
        for name in ["ro ot", "a,b", "a;b", "a&b", "a|b"] {
            assert_eq!(
                user(name).validate().unwrap_err(),
                ResourceValidationError::InvalidUsername { name: name.into() }
            );
        }
    }

    #[test]
    fn test_validate_password() {
        let mut u = user("root");
        u.password = None;
        assert!(matches!(
            u.validate().unwrap_err(),
            ResourceValidationError::MissingPassword { .. }
        ));

        u.ensure = Ensure::Absent;
        u.validate().unwrap();

        let mut u = user("root");
        u.password = Some(String::new());
        assert!(matches!(
            u.validate().unwrap_err(),
            ResourceValidationError::EmptyPassword { .. }
        ));

        let mut u = user("root");
        u.rounds = 0;
        assert!(matches!(
            u.validate().unwrap_err(),
            ResourceValidationError::InvalidRounds { .. }
        ));
    }
}
