use std::{panic, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info, warn, LevelFilter};

use grubstate::{
    cli::{Cli, Commands, OutputFormat},
    engine,
    facts::Facts,
    load_manifest,
    tools::SystemBootTools,
    BackgroundLog, MultiLogger, RunContext,
};
use grubstate_api::error::{GrubStateError, GrubStateResultExt, InternalError, ReportError};

enum Outcome {
    Done,
    ResourcesFailed(usize),
}

fn print(format: OutputFormat, value: &impl serde::Serialize) -> Result<(), GrubStateError> {
    let rendered = format
        .render(value)
        .structured(InternalError::SerializeReport)?;
    print!("{rendered}");
    Ok(())
}

fn run(args: &Cli) -> Result<Outcome, GrubStateError> {
    info!("grubstate version: {}", grubstate::GRUBSTATE_VERSION);

    if let Commands::Validate { manifest } = &args.command {
        let manifest = load_manifest(manifest)?;
        engine::validate(&manifest)?;
        info!("Manifest is valid");
        return Ok(Outcome::Done);
    }

    let facts = Facts::gather(&args.root);
    if let Commands::Facts = &args.command {
        print(args.format, &facts)?;
        return Ok(Outcome::Done);
    }

    let tools = SystemBootTools::new(&args.root, facts.os_release.clone());
    let mut ctx = RunContext::new(&args.root, facts, Box::new(tools));

    match &args.command {
        Commands::Apply { manifest, noop } => {
            let manifest = load_manifest(manifest)?;
            ctx.noop = *noop;

            let reports = engine::apply(&manifest, &mut ctx)
                .message(format!("Failed to execute '{}' command", args.command))?;
            print(args.format, &reports)?;

            let failed = reports.iter().filter(|r| r.failed()).count();
            if failed > 0 {
                return Ok(Outcome::ResourcesFailed(failed));
            }
            Ok(Outcome::Done)
        }
        Commands::List { kind } => {
            let resources = engine::list((*kind).into(), &mut ctx)?;
            print(args.format, &resources)?;
            Ok(Outcome::Done)
        }
        _ => Err(GrubStateError::internal("Invalid command")),
    }
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    let mut multilogger = MultiLogger::new()
        // Regular env_logger to stderr
        .with_logger(Box::new(
            env_logger::builder()
                .format_timestamp(None)
                .filter_level(args.verbosity)
                .build(),
        ))
        .with_target_filter("osutils::augtree", LevelFilter::Debug);

    if let Some(path) = &args.log_file {
        multilogger.add_logger(
            BackgroundLog::open(path)
                .context("Failed to set up the background log")?
                .with_max_level(LevelFilter::Debug)
                .into_logger(),
        );
    }

    multilogger.init().context("Logger already registered")?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    let res = match panic::catch_unwind(|| run(&args)) {
        Err(e) => Err(GrubStateError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r,
    };

    match res {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::ResourcesFailed(count)) => {
            warn!("{count} resource(s) failed to apply");
            ExitCode::from(3)
        }
        Err(e) => {
            error!("grubstate failed: {e:?}");
            ExitCode::from(2)
        }
    }
}
