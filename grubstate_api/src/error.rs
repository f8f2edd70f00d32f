use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::config::ResourceValidationError;

/// The declared resources could not be loaded or are invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load manifest from '{path}'")]
    LoadManifest { path: String },

    #[error("Failed to parse manifest")]
    ParseManifest,

    #[error("Invalid resource: {0}")]
    InvalidResource(#[from] ResourceValidationError),

    #[error(
        "Resource '{first}' conflicts with resource '{second}': both manage '{variable}' in '{target}'"
    )]
    ResourceConflict {
        first: String,
        second: String,
        variable: String,
        target: String,
    },

    #[error("Resource '{resource}' is missing required property '{property}'")]
    MissingProperty {
        resource: String,
        property: &'static str,
    },
}

/// The requested change cannot be expressed on this system.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum UnsupportedConfigurationError {
    #[error("Unsupported bootmode '{bootmode}' for provider '{provider}'")]
    UnsupportedBootmode {
        bootmode: String,
        provider: &'static str,
    },

    #[error("Cannot modify a stock system resource; please change your resource name '{name}'")]
    StockEntryModification { name: String },

    #[error("No suitable provider found for resource kind '{kind}'")]
    NoSuitableProvider { kind: &'static str },

    #[error("Provider '{provider}' does not exist for resource kind '{kind}'")]
    UnknownProvider { provider: String, kind: &'static str },
}

/// A `:default:` or `:defaults:` directive could not be resolved.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum MissingDefaultError {
    #[error("No default GRUB information found for `{flavor}`")]
    NoDefaultValue { flavor: String },

    #[error("Could not find a default GRUB2 entry, check the system grub configuration")]
    NoDefaultEntry,
}

/// A bootloader artifact could not be parsed or rendered.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ParseError {
    #[error("Failed to parse '{path}'")]
    ConfigFile { path: String },

    #[error("Failed to save '{path}'")]
    SaveConfigFile { path: String },

    #[error("Malformed config file received")]
    MalformedMenuConfig,

    #[error("Failed to process BLS entries")]
    BlsEntries,

    #[error("Failed to parse managed users file '{path}'")]
    UsersFile { path: String },

    #[error("Failed to parse password hash for user '{user}'")]
    PasswordHash { user: String },
}

/// The process was missing something it needs from its environment.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionEnvironmentMisconfigurationError {
    #[error("Failed to find required binary '{binary}'")]
    MissingBinary { binary: &'static str },

    #[error("No grub configuration found at '{paths}'")]
    NoGrubConfig { paths: String },
}

/// Applying the declared state to the system failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ServicingError {
    #[error("Failed to execute '{binary}'")]
    CommandCouldNotExecute { binary: &'static str },

    #[error("'{binary}' failed: {explanation}")]
    CommandFailed {
        binary: &'static str,
        explanation: String,
    },

    #[error("No output from grub2-mkconfig")]
    EmptyMkconfigOutput,

    #[error("Failed to regenerate the GRUB configuration")]
    RegenerateConfig,

    #[error("Failed to set default boot entry '{entry}'")]
    SetDefaultEntry { entry: String },

    #[error("Failed to write '{path}'")]
    WriteFile { path: String },

    #[error("Failed to remove '{path}'")]
    RemoveFile { path: String },

    #[error("Failed to read '{path}'")]
    ReadFile { path: String },

    #[error("Failed to hash password for user '{user}'")]
    HashPassword { user: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),

    #[error("Property '{property}' is not supported by provider '{provider}'")]
    UnknownProperty {
        property: &'static str,
        provider: &'static str,
    },

    #[error("Failed to serialize report")]
    SerializeReport,

    #[error("grubstate panicked: {0}")]
    Panic(String),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The declared resources are invalid or conflict with each other.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// The declaration asks for something the selected provider cannot express.
    #[error(transparent)]
    UnsupportedConfiguration(#[from] UnsupportedConfigurationError),

    /// A default-entry sentinel was used but no default entry is known.
    #[error(transparent)]
    MissingDefault(#[from] MissingDefaultError),

    /// A bootloader file could not be parsed or its edits could not be saved.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A required tool or file is missing from the system.
    #[error(transparent)]
    ExecutionEnvironmentMisconfiguration(#[from] ExecutionEnvironmentMisconfigurationError),

    /// Writing a file or running a boot tool failed.
    #[error(transparent)]
    Servicing(#[from] ServicingError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct GrubStateErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct GrubStateError(Box<GrubStateErrorInner>);
impl GrubStateError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        GrubStateError(Box::new(GrubStateErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(kind: impl Into<ErrorKind>, source: anyhow::Error) -> Self {
        GrubStateError(Box::new(GrubStateErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(source),
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn internal(message: &'static str) -> Self {
        Self::new(InternalError::Internal(message))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns the category name of the error, e.g. `invalid-input`.
    pub fn category(&self) -> &'static str {
        (&self.0.kind).into()
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured GrubStateError.
    fn structured(self, kind: K) -> Result<T, GrubStateError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, GrubStateError> {
        match self {
            Some(t) => Ok(t),
            None => Err(GrubStateError::new(kind)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, GrubStateError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(GrubStateError::with_source(kind, e.into())),
        }
    }
}

pub trait GrubStateResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, GrubStateError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}
impl<T> GrubStateResultExt<T> for Result<T, GrubStateError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, GrubStateError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for GrubStateError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("grubstate-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::UnsupportedConfiguration(ref e) => state.serialize_field("error", e)?,
            ErrorKind::MissingDefault(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Parse(ref e) => state.serialize_field("error", e)?,
            ErrorKind::ExecutionEnvironmentMisconfiguration(ref e) => {
                state.serialize_field("error", e)?
            }
            ErrorKind::Servicing(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for GrubStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for GrubStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = GrubStateError(Box::new(GrubStateErrorInner {
            kind: ErrorKind::Parse(ParseError::ConfigFile {
                path: "/etc/default/grub".into(),
            }),
            location: Location::caller(),
            source: Some(
                std::fs::read("/non-existant-file")
                    .context("failed to read file")
                    .unwrap_err(),
            ),
            context: Vec::new(),
        }));
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                match m["error"] {
                    Value::Tagged(ref tagged) => {
                        assert_eq!(tagged.tag, "config-file");
                        assert!(matches!(tagged.value, Value::Mapping(_)));
                    }
                    _ => panic!("error isn't a tagged variant"),
                }
                assert_eq!(
                    serde_yaml::from_value::<ParseError>(m["error"].clone()).unwrap(),
                    ParseError::ConfigFile {
                        path: "/etc/default/grub".into(),
                    }
                );
                assert_eq!(m["category"], Value::String("parse".into()));
                assert!(matches!(m["cause"], Value::String(_)));
                assert_eq!(
                    m["message"],
                    Value::String("Failed to parse '/etc/default/grub'".into())
                );
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_serialize_unit_variant() {
        let e = GrubStateError::new(ParseError::MalformedMenuConfig);
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m["error"], Value::String("malformed-menu-config".into()));
                assert_eq!(m["cause"], Value::Null);
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_error_message_context() {
        let error = Err::<(), _>(GrubStateError::new(MissingDefaultError::NoDefaultValue {
            flavor: "kernel".into(),
        }))
        .message("Failed to resolve kernel")
        .unwrap_err();
        let rendered = format!("{:?}", error);
        assert!(rendered.starts_with("No default GRUB information found for `kernel` at "));
        assert!(rendered.contains("Context:\n    0: Failed to resolve kernel at "));
        assert_eq!(error.category(), "missing-default");
    }

    #[test]
    fn test_option_structured() {
        let error = None::<u8>
            .structured(MissingDefaultError::NoDefaultEntry)
            .unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::MissingDefault(MissingDefaultError::NoDefaultEntry)
        );
    }
}
