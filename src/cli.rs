use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use grubstate_api::config::ResourceKind;

use crate::GRUBSTATE_VERSION;

#[derive(Parser, Debug)]
#[clap(version = GRUBSTATE_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Directory under which every system path is resolved
    #[arg(global = true, long, default_value = "/")]
    pub root: PathBuf,

    /// Also append JSON log lines to this file
    #[arg(global = true, long)]
    pub log_file: Option<PathBuf>,

    /// Format of the printed output
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub format: OutputFormat,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring the boot configuration in line with a manifest
    Apply {
        /// The manifest to apply
        #[clap(index = 1)]
        manifest: PathBuf,

        /// Report the changes without making them
        #[clap(long)]
        noop: bool,
    },

    /// Validate a manifest without touching the system
    Validate {
        /// The manifest to validate
        #[clap(index = 1)]
        manifest: PathBuf,
    },

    /// List the resources of one kind found on the system
    List {
        #[clap(index = 1)]
        kind: ListKind,
    },

    /// Print the detected facts about the boot configuration
    Facts,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Apply { .. } => "apply",
            Commands::Validate { .. } => "validate",
            Commands::List { .. } => "list",
            Commands::Facts => "facts",
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum ListKind {
    KernelParameter,
    GrubConfig,
    GrubMenuentry,
    GrubUser,
}

impl From<ListKind> for ResourceKind {
    fn from(value: ListKind) -> Self {
        match value {
            ListKind::KernelParameter => ResourceKind::KernelParameter,
            ListKind::GrubConfig => ResourceKind::GrubConfig,
            ListKind::GrubMenuentry => ResourceKind::GrubMenuentry,
            ListKind::GrubUser => ResourceKind::GrubUser,
        }
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

impl OutputFormat {
    pub fn render<T: serde::Serialize>(&self, value: &T) -> Result<String, anyhow::Error> {
        Ok(match self {
            OutputFormat::Yaml => serde_yaml::to_string(value)?,
            OutputFormat::Json => serde_json::to_string_pretty(value)? + "\n",
        })
    }
}
