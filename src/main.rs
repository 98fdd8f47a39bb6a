//! dlcpack - Song package packer/unpacker

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use dlcpack_core::metadata::AudioLevels;
use dlcpack_core::{resolve, BatchReport, PackOptions, PackSettings, Packer, Platform, ProgressFn};
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Cli, Commands, Target};

/// Exit status when help was printed instead of doing any work.
const EXIT_HELP: u8 = 255;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayVersion
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => ExitCode::from(EXIT_HELP),
                _ => ExitCode::FAILURE,
            };
        }
    };

    init_logging();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Also forwards `log` records from the library crates.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn explicit_platform(target: &Target) -> Result<Option<Platform>> {
    Platform::from_override(target.platform, target.game_version)
}

fn progress_bar() -> Result<(ProgressBar, ProgressFn)> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let pb_clone = pb.clone();
    let progress_fn: ProgressFn = Arc::new(move |current: usize, total: usize, msg: &str| {
        pb_clone.set_length(total as u64);
        pb_clone.set_position(current as u64);
        pb_clone.set_message(msg.to_string());
    });
    Ok((pb, progress_fn))
}

fn print_report(action: &str, report: &BatchReport) {
    println!();
    println!("{} complete: {} succeeded, {} failed", action, report.completed.len(), report.failed.len());
    for path in &report.completed {
        println!("  {}", path.display());
    }
    for (source, e) in &report.failed {
        println!("  FAILED {}: {:#}", source.display(), e);
    }
}

fn run(cli: Cli) -> Result<bool> {
    let settings = PackSettings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Pack {
            target,
            output,
            app_id,
            revision,
            quality,
            decibels,
            update_sng,
            delete_fixed_audio,
        } => {
            let options = PackOptions {
                platform: explicit_platform(&target)?,
                regenerate_sng: update_sng,
                app_id,
                revision,
                audio: AudioLevels {
                    volume: decibels,
                    preview_volume: decibels,
                    quality,
                },
                delete_fixed_audio,
            };

            println!("dlcpack - Packing {} item(s) into {}", target.inputs.len(), output.display());
            let packer = Packer::from_settings(&settings)?;
            let (pb, progress_fn) = progress_bar()?;
            let report = packer.pack_batch(&target.inputs, &output, &options, Some(progress_fn));
            pb.finish_with_message("Complete");

            print_report("Packing", &report);
            Ok(report.is_success())
        }

        Commands::Unpack { target, output } => {
            let explicit = explicit_platform(&target)?;

            println!("dlcpack - Unpacking {} item(s) into {}", target.inputs.len(), output.display());
            let packer = Packer::from_settings(&settings)?;
            let (pb, progress_fn) = progress_bar()?;
            let report = packer.unpack_batch(&target.inputs, &output, explicit, Some(progress_fn));
            pb.finish_with_message("Complete");

            print_report("Unpacking", &report);
            Ok(report.is_success())
        }

        Commands::Detect { target } => {
            let explicit = explicit_platform(&target)?;
            let mut all_known = true;
            for input in &target.inputs {
                let platform = resolve(input, explicit);
                if platform.is_unknown() {
                    all_known = false;
                }
                println!("{}: {}", input.display(), platform);
            }
            Ok(all_known)
        }
    }
}
