//! Play a WAVE file on the current driver
//!
//! ```text
//! cargo run --example play_wave -- path/to/file.wav
//! ```

use audiodrv::prelude::*;
use std::sync::Arc;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: play_wave FILE");
            std::process::exit(2);
        }
    };

    let buffer = Arc::new(wave::load(&path)?);
    println!(
        "{}: {} frames, {} channel(s), {} Hz",
        path,
        buffer.columns(),
        buffer.rows(),
        buffer.rate().unwrap_or(wave::DEFAULT_RATE)
    );

    let host = AudioHost::new()?;
    let player = host.player(buffer, PlayerOptions::new())?;
    println!("Playing on '{}'...", host.driver_name(player)?);

    host.start(player)?;
    host.wait(player, -1.0)?;
    host.dispose(player)?;

    println!("Done.");
    Ok(())
}
