use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[command(name = "audiodrv")]
#[command(about = "Play and record audio through the available drivers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List the available drivers; the current one is marked with '*'.
    Drivers {
        /// Print the list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Play a WAVE file.
    Play {
        file: PathBuf,

        /// Driver to play on ("null" discards the audio).
        #[arg(long)]
        driver: Option<String>,

        /// Repeat until the timeout elapses.
        #[arg(long = "loop")]
        looping: bool,

        /// Playback rate in Hz, instead of the file's.
        #[arg(long)]
        rate: Option<f64>,

        /// Stop after this many seconds; negative plays to the end.
        #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
        timeout: f64,
    },

    /// Record into a WAVE file.
    Record {
        file: PathBuf,

        /// Length of the recording.
        #[arg(long, value_parser = positive_seconds)]
        seconds: f64,

        /// Recording rate in Hz.
        #[arg(long)]
        rate: Option<u32>,

        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=2))]
        channels: u16,

        #[arg(long)]
        driver: Option<String>,
    },

    /// Load a driver module and make it current.
    Load { module: PathBuf },
}

fn positive_seconds(value: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(seconds) if seconds > 0.0 && seconds.is_finite() => Ok(seconds),
        Ok(_) => Err("must be a positive number of seconds".to_string()),
        Err(e) => Err(e.to_string()),
    }
}
