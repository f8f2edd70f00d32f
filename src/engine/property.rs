use std::fmt::{self, Display};

use serde::Serialize;

use grubstate_api::error::{GrubStateError, ParseError, ReportError};

use crate::users;

/// The value of a property, either as found on the system or as declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    #[default]
    Absent,
    Flag(bool),
    Scalar(String),
    List(Vec<String>),
    Nested(Vec<Vec<String>>),
}

impl PropertyValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        PropertyValue::Scalar(value.into())
    }

    pub fn optional(value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => PropertyValue::Scalar(value.into()),
            None => PropertyValue::Absent,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            PropertyValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            PropertyValue::Flag(value) => Some(*value),
            _ => None,
        }
    }

    /// The values of a list; a scalar counts as a list of one.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            PropertyValue::Absent | PropertyValue::Flag(_) => Vec::new(),
            PropertyValue::Scalar(value) => vec![value.clone()],
            PropertyValue::List(values) => values.clone(),
            PropertyValue::Nested(values) => values.iter().flatten().cloned().collect(),
        }
    }

    pub fn to_nested(&self) -> Vec<Vec<String>> {
        match self {
            PropertyValue::Nested(values) => values.clone(),
            other => vec![other.to_list()],
        }
    }
}

impl Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Absent => write!(f, "absent"),
            PropertyValue::Flag(value) => write!(f, "{value}"),
            PropertyValue::Scalar(value) => write!(f, "'{value}'"),
            PropertyValue::List(values) => write!(f, "[{}]", values.join(", ")),
            PropertyValue::Nested(values) => write!(
                f,
                "[{}]",
                values
                    .iter()
                    .map(|v| format!("[{}]", v.join(", ")))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// How the value on the system is compared to the declared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    /// Values must be identical.
    Exact,
    /// Lists must hold the same values in any order.
    Unordered,
    /// A password of `user`, plaintext or hashed on either side.
    Password { user: String },
}

impl PropertyKind {
    pub fn insync(
        &self,
        is: &PropertyValue,
        should: &PropertyValue,
    ) -> Result<bool, GrubStateError> {
        match self {
            PropertyKind::Exact => Ok(is == should),
            PropertyKind::Unordered => {
                let (mut is, mut should) = (is.to_list(), should.to_list());
                is.sort();
                should.sort();
                Ok(is == should)
            }
            PropertyKind::Password { user } => match (is.as_scalar(), should.as_scalar()) {
                (Some(is), Some(should)) => users::password_insync(is, should)
                    .structured(ParseError::PasswordHash { user: user.clone() }),
                _ => Ok(is == should),
            },
        }
    }
}

/// A property of a resource with its current and declared values.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub is: PropertyValue,
    pub should: PropertyValue,
}

impl Property {
    pub fn new(
        name: &'static str,
        kind: PropertyKind,
        is: PropertyValue,
        should: PropertyValue,
    ) -> Self {
        Property {
            name,
            kind,
            is,
            should,
        }
    }

    pub fn exact(name: &'static str, is: PropertyValue, should: PropertyValue) -> Self {
        Self::new(name, PropertyKind::Exact, is, should)
    }

    pub fn insync(&self) -> Result<bool, GrubStateError> {
        self.kind.insync(&self.is, &self.should)
    }

    /// Describes the change applied to the property.
    pub fn change(&self) -> String {
        match self.kind {
            PropertyKind::Password { .. } => format!("{} changed", self.name),
            _ => format!("{} changed {} to {}", self.name, self.is, self.should),
        }
    }
}
