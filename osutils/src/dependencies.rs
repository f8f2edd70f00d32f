//! The external boot tools grubstate drives, and a small command runner
//! around them.

use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    io,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{Command as StdCommand, ExitStatus},
};

use log::trace;
use strum_macros::IntoStaticStr;

use grubstate_api::error::{
    ExecutionEnvironmentMisconfigurationError, GrubStateError, GrubStateResultExt, ServicingError,
};

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Failed to find dependency '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },

    #[error("Failed to execute '{command}': {source}")]
    CouldNotExecute {
        dependency: Dependency,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' {explanation}\n{output}")]
    ExecutionFailed {
        dependency: Dependency,
        command: String,
        explanation: String,
        output: String,
    },
}

impl DependencyError {
    pub fn dependency(&self) -> Dependency {
        match self {
            Self::NotFound { dependency, .. }
            | Self::CouldNotExecute { dependency, .. }
            | Self::ExecutionFailed { dependency, .. } => *dependency,
        }
    }
}

impl From<DependencyError> for GrubStateError {
    #[track_caller]
    fn from(value: DependencyError) -> Self {
        let binary = value.dependency().name();
        match value {
            DependencyError::NotFound { source, .. } => GrubStateError::with_source(
                ExecutionEnvironmentMisconfigurationError::MissingBinary { binary },
                source.into(),
            ),
            DependencyError::CouldNotExecute { source, .. } => GrubStateError::with_source(
                ServicingError::CommandCouldNotExecute { binary },
                source.into(),
            ),
            DependencyError::ExecutionFailed {
                ref explanation, ..
            } => {
                let explanation = explanation.clone();
                // Command line and output stay attached as the source
                GrubStateError::with_source(
                    ServicingError::CommandFailed {
                        binary,
                        explanation,
                    },
                    value.into(),
                )
            }
        }
    }
}

pub trait DependencyResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, GrubStateError>;
}

impl<T> DependencyResultExt<T> for Result<T, Box<DependencyError>> {
    #[track_caller]
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, GrubStateError> {
        let result: Result<T, GrubStateError> = self.map_err(|e| (*e).into());
        result.message(context)
    }
}

/// Boot tools grubstate may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    #[strum(serialize = "grub2-mkconfig")]
    Grub2Mkconfig,
    #[strum(serialize = "grub2-set-default")]
    Grub2SetDefault,
    #[strum(serialize = "grub-mkconfig")]
    GrubMkconfig,
    Grubby,
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    False,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl Dependency {
    /// Where to look when the dependency is not in $PATH.
    fn fallback_path(&self) -> Option<&'static Path> {
        match self {
            Self::GrubMkconfig => Some(Path::new("/usr/sbin/grub-mkconfig")),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn exists(&self) -> bool {
        self.path().is_ok()
    }

    pub fn path(&self) -> Result<PathBuf, Box<DependencyError>> {
        which::which(self.name())
            .or_else(|source| match self.fallback_path() {
                Some(path) => which::which(path).map_err(|_| source),
                None => Err(source),
            })
            .map_err(|source| {
                Box::new(DependencyError::NotFound {
                    dependency: *self,
                    source,
                })
            })
    }

    /// The first of `candidates` installed on the system.
    pub fn first_available(candidates: &[Dependency]) -> Option<Dependency> {
        candidates.iter().copied().find(Dependency::exists)
    }

    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            args: Vec::new(),
        }
    }
}

pub struct Command {
    dependency: Dependency,
    args: Vec<OsString>,
}

impl Command {
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.arg(arg);
        self
    }

    /// The command line as it would be typed in a shell.
    fn render(&self) -> String {
        std::iter::once(Cow::Borrowed(self.dependency.name()))
            .chain(self.args.iter().map(|arg| {
                let arg = arg.to_string_lossy();
                if arg.contains(' ') {
                    Cow::Owned(format!("'{arg}'"))
                } else {
                    arg
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn output(&self) -> Result<CommandOutput, Box<DependencyError>> {
        let command = self.render();
        trace!("Executing '{command}'");
        let output = StdCommand::new(self.dependency.path()?)
            .args(&self.args)
            .output()
            .map_err(|source| DependencyError::CouldNotExecute {
                dependency: self.dependency,
                command: command.clone(),
                source,
            })?;

        let output = CommandOutput {
            dependency: self.dependency,
            command,
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into(),
            stderr: String::from_utf8_lossy(&output.stderr).into(),
        };
        trace!(
            "Executed '{}': {}\n{}",
            output.command,
            output.explain_exit(),
            output.report()
        );
        Ok(output)
    }

    pub fn run_and_check(&self) -> Result<(), Box<DependencyError>> {
        self.output()?.check()
    }

    /// Runs the command and returns its stdout when it succeeded.
    pub fn output_and_check(&self) -> Result<String, Box<DependencyError>> {
        let output = self.output()?;
        output.check()?;
        Ok(output.stdout)
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    dependency: Dependency,
    command: String,
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// stdout and stderr, labelled, for error reports and logs.
    pub fn report(&self) -> String {
        let mut sections = Vec::new();
        if !self.stdout.is_empty() {
            sections.push(format!("stdout:\n{}", self.stdout));
        }
        if !self.stderr.is_empty() {
            sections.push(format!("stderr:\n{}", self.stderr));
        }
        if sections.is_empty() {
            return "(no output collected)".into();
        }
        sections.join("\n")
    }

    fn explain_exit(&self) -> String {
        if let Some(code) = self.status.code() {
            format!("exited with status {code}")
        } else if let Some(signal) = self.status.signal() {
            format!("was terminated by signal {signal}")
        } else {
            "exited with unknown status".into()
        }
    }

    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.success() {
            return Ok(());
        }

        Err(Box::new(DependencyError::ExecutionFailed {
            dependency: self.dependency,
            command: self.command.clone(),
            explanation: self.explain_exit(),
            output: self.report(),
        }))
    }
}
