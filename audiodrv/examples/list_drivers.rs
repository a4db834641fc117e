//! List the audio drivers available on this machine

use audiodrv::prelude::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Audio Drivers");
    println!("=============\n");

    let host = AudioHost::new()?;
    let drivers = host.drivers();
    if drivers.is_empty() {
        println!("No audio drivers found.");
        return Ok(());
    }

    for (i, driver) in drivers.iter().enumerate() {
        let marker = if driver.current { "*" } else { " " };
        println!("{} {}. {} - {}", marker, i + 1, driver.name, driver.description);
        if !driver.copyright.is_empty() {
            println!("     {}", driver.copyright);
        }
        if driver.recording {
            println!("     supports recording");
        }
    }

    #[cfg(feature = "cpal-backend")]
    for driver in CpalDriver::probe() {
        println!("\n{} output devices:", driver.name());
        for device in driver.list_output_devices().unwrap_or_default() {
            println!("  - {}", device);
        }
    }

    Ok(())
}
