//! Command-line interface for dlcpack

use clap::{Args, Parser, Subcommand};
use dlcpack_core::metadata::{DEFAULT_DECIBELS, DEFAULT_QUALITY, DEFAULT_REVISION};
use dlcpack_core::{GamePlatform, GameVersion};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dlcpack")]
#[command(about = "dlcpack - Song package packer/unpacker for PC, Mac, Xbox 360 and PS3", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to dlcpack.json in the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs and platform override shared by every command.
#[derive(Args)]
pub struct Target {
    /// Input folders or packages (repeatable, or separated by ';')
    #[arg(short, long = "input", required = true, value_delimiter = ';')]
    pub inputs: Vec<PathBuf>,

    /// Package platform (Pc, Mac, XBox360, PS3); requires --version
    #[arg(short = 'f', long)]
    pub platform: Option<GamePlatform>,

    /// Game version (RS2012, RS2014); requires --platform
    #[arg(short = 'v', long = "version")]
    pub game_version: Option<GameVersion>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pack song folders into platform packages
    Pack {
        #[command(flatten)]
        target: Target,

        /// Output folder
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Application id written to the package (keeps the source's app id file when omitted)
        #[arg(short, long)]
        app_id: Option<String>,

        /// Package revision
        #[arg(short, long, default_value = DEFAULT_REVISION)]
        revision: String,

        /// Audio quality, recorded in console package headers
        #[arg(short, long, default_value_t = DEFAULT_QUALITY)]
        quality: u8,

        /// Song and preview volume in dB for manifests that leave them unset
        #[arg(short, long, default_value_t = DEFAULT_DECIBELS, allow_negative_numbers = true)]
        decibels: i16,

        /// Rebuild binary charts from their XML before packing
        #[arg(long)]
        update_sng: bool,

        /// Delete leftover *_fixed.ogg / *_fixed.wem files before packing
        #[arg(long)]
        delete_fixed_audio: bool,
    },

    /// Unpack platform packages into folders
    Unpack {
        #[command(flatten)]
        target: Target,

        /// Output folder
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Print the platform detected for each input
    Detect {
        #[command(flatten)]
        target: Target,
    },
}
