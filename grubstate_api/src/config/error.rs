//! Validation errors for declared resources.

use serde::{Deserialize, Serialize};

/// Identifies errors detected during static validation of a declared resource, i.e. errors that
/// can be detected without reading or writing anything on the host.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceValidationError {
    #[error("A '{kind}' resource has an empty name")]
    EmptyName { kind: String },

    #[error("Resource '{resource}' cannot use both ':defaults:' and ':preserve:' in '{property}'")]
    ConflictingDirectives { resource: String, property: String },

    #[error("Resource '{resource}' has an empty module at position {index}")]
    EmptyModule { resource: String, index: usize },

    #[error("Resource '{resource}' has module '{path}' whose path is not absolute")]
    InvalidModulePath { resource: String, path: String },

    #[error("Resource '{resource}' has invalid {property} '{value}': must be an absolute path, ':default:' or ':preserve:'")]
    InvalidBootPath {
        resource: String,
        property: String,
        value: String,
    },

    #[error("Resource '{resource}' has invalid root '{value}': must look like '(hd0,0)'")]
    InvalidRoot { resource: String, value: String },

    #[error("Username '{name}' may not contain spaces, commas, semicolons, ampersands, or pipes")]
    InvalidUsername { name: String },

    #[error("User '{name}' must have a password")]
    MissingPassword { name: String },

    #[error("User '{name}' has an empty password")]
    EmptyPassword { name: String },

    #[error("User '{name}' must use a positive number of hashing rounds")]
    InvalidRounds { name: String },

    #[error("Resource '{resource}' has unsupported bootmode '{bootmode}', expected one of: {expected}")]
    InvalidBootmode {
        resource: String,
        bootmode: String,
        expected: String,
    },

    #[error("Resource '{resource}' has an empty value")]
    EmptyValue { resource: String },

    #[error("Resource '{resource}' sets target '{target}', which is not an absolute path")]
    RelativeTarget { resource: String, target: String },
}
