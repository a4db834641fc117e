//! Command line front end for audiodrv

mod cli;
mod errors;

use audiodrv::backends::QueueDriver;
use audiodrv::prelude::*;
use clap::Parser;
use cli::{Cli, Command};
use errors::{CliError, Result};
use std::path::Path;
use std::sync::Arc;

/// Make `name` current. The null device is registered on demand.
fn select_driver(host: &AudioHost, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => return Ok(()),
    };
    if host.select_driver(name).is_some() {
        return Ok(());
    }
    if name == "null" {
        host.registry().register(Arc::new(QueueDriver::null()));
        return Ok(());
    }
    Err(CliError::UnknownDriver(name.to_string()))
}

fn list_drivers(host: &AudioHost, json: bool) -> Result<()> {
    let drivers = host.drivers();
    if json {
        println!("{}", serde_json::to_string_pretty(&drivers)?);
        return Ok(());
    }
    if drivers.is_empty() {
        println!("No audio drivers available");
    }
    for driver in drivers {
        let marker = if driver.current { "*" } else { " " };
        let recording = if driver.recording { " [rec]" } else { "" };
        println!(
            "{} {:<12} {}{}",
            marker, driver.name, driver.description, recording
        );
    }
    Ok(())
}

fn play(
    host: &AudioHost,
    path: &Path,
    driver: Option<&str>,
    looping: bool,
    rate: Option<f64>,
    timeout: f64,
) -> Result<()> {
    select_driver(host, driver)?;

    let buffer = Arc::new(wave::load(path)?);
    let mut options = PlayerOptions::new().looping(looping);
    if let Some(rate) = rate {
        options = options.rate(rate);
    }

    let player = host.player(buffer, options)?;
    log::info!(
        "playing {} on '{}'",
        path.display(),
        host.driver_name(player)?
    );
    host.start(player)?;
    let status = host.wait(player, timeout)?;
    if status == WaitStatus::TimedOut {
        log::info!("stopped after {} s", timeout);
    }
    host.dispose(player)?;
    Ok(())
}

fn record(
    host: &AudioHost,
    path: &Path,
    seconds: f64,
    rate: Option<u32>,
    channels: usize,
    driver: Option<&str>,
) -> Result<()> {
    select_driver(host, driver)?;

    let rate = rate.unwrap_or(host.config().default_rate);

    let frames = (seconds * rate as f64) as usize;
    let target = Arc::new(SampleBuffer::zeros(frames * channels).with_rows(channels)?);
    let recorder = host.recorder(
        target.clone(),
        RecorderOptions::new().rate(rate as f64).channels(channels),
    )?;
    log::info!(
        "recording {} s at {} Hz on '{}'",
        seconds,
        rate,
        host.driver_name(recorder)?
    );
    host.start(recorder)?;
    host.wait(recorder, seconds + 5.0)?;
    host.dispose(recorder)?;

    wave::save(path, &target)?;
    println!("{}", path.display());
    Ok(())
}

fn load(host: &AudioHost, path: &Path) -> Result<()> {
    let name = host.load_driver(path)?;
    for driver in host.drivers().into_iter().filter(|d| d.name == name) {
        println!("{} - {}", driver.name, driver.description);
        if !driver.copyright.is_empty() {
            println!("{}", driver.copyright);
        }
    }
    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let host = AudioHost::new()?;
    match cli.command {
        Command::Drivers { json } => list_drivers(&host, json)?,
        Command::Play {
            file,
            driver,
            looping,
            rate,
            timeout,
        } => play(&host, &file, driver.as_deref(), looping, rate, timeout)?,
        Command::Record {
            file,
            seconds,
            rate,
            channels,
            driver,
        } => record(
            &host,
            &file,
            seconds,
            rate,
            channels as usize,
            driver.as_deref(),
        )?,
        Command::Load { module } => load(&host, &module)?,
    }
    Ok(())
}
