//! Record a few seconds from the default input into a WAVE file
//!
//! ```text
//! cargo run --example record_wave -- out.wav 3
//! ```

use audiodrv::prelude::*;
use std::sync::Arc;

const RATE: u32 = 44100;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "recording.wav".to_string());
    let seconds: f64 = args.next().map(|s| s.parse::<f64>()).transpose()?.unwrap_or(3.0);

    let host = AudioHost::new()?;
    let target = Arc::new(SampleBuffer::zeros((seconds * RATE as f64) as usize));
    let recorder = host.recorder(target.clone(), RecorderOptions::new().rate(RATE as f64))?;

    println!("Recording {} s on '{}'...", seconds, host.driver_name(recorder)?);
    host.start(recorder)?;
    host.wait(recorder, seconds + 5.0)?;
    host.dispose(recorder)?;

    wave::save(&path, &target)?;
    println!("Saved {}", path);
    Ok(())
}
