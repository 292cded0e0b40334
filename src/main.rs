//! updiprog - A single-wire UPDI programmer
//!
//! Flashes Intel-HEX images and fuse bytes into AVR microcontrollers through
//! one GPIO pin. The UART framing, the UPDI link protocol and the NVM
//! programming algorithm all run in software (see `updiprog-core`).
//!
//! # Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Any other error |
//! | 2 | Programmer or link initialization failed |
//! | 3 | Device description or Intel-HEX file could not be parsed |
//! | 4 | Chip erase or blank check failed |
//! | 5 | Programming (flash or fuses) failed |
//! | 6 | Verification failed |

mod cli;
mod commands;
mod programmers;

use clap::Parser;
use cli::{Cli, Commands};
use commands::{CommandError, FlashOptions, IndicatifProgress};
use updiprog_core::app::UpdiDevice;
use updiprog_core::config::DeviceConfig;
use updiprog_core::link::UpdiTransport;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(cli) {
        let message = e.to_string();
        eprintln!("Error: {}", message);

        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                eprintln!("  caused by: {}", text);
            }
            source = std::error::Error::source(cause);
        }

        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CommandError> {
    let device = commands::load_device_config(cli.device.as_deref())?;
    let mut progress = IndicatifProgress::new();

    match cli.command {
        Commands::Flash {
            programmer,
            input,
            no_verify,
            no_fuses,
        } => {
            // Parse before touching the target
            let image = commands::load_image(&input, &device)?;
            let mut dev = open_device(&programmer, device)?;
            let options = FlashOptions {
                verify: !no_verify,
                fuses: !no_fuses,
            };
            commands::run_flash(&mut dev, &image, options, &mut progress)
        }
        Commands::Erase { programmer } => {
            let mut dev = open_device(&programmer, device)?;
            commands::run_erase(&mut dev, &mut progress)
        }
        Commands::BlankCheck { programmer } => {
            let mut dev = open_device(&programmer, device)?;
            commands::run_blank_check(&mut dev, &mut progress)
        }
        Commands::Verify { programmer, input } => {
            let image = commands::load_image(&input, &device)?;
            let mut dev = open_device(&programmer, device)?;
            commands::run_verify(&mut dev, &image, &mut progress)
        }
        Commands::Read {
            programmer,
            output,
            length,
        } => {
            let mut dev = open_device(&programmer, device)?;
            commands::run_read(&mut dev, &output, length, &mut progress)
        }
        Commands::Info { programmer } => {
            let mut dev = open_device(&programmer, device)?;
            commands::run_info(&mut dev)
        }
        Commands::Fuses { programmer, input } => {
            let image = commands::load_image(&input, &device)?;
            let mut dev = open_device(&programmer, device)?;
            commands::run_fuses(&mut dev, &image, &mut progress)
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
    }
}

/// Open the programmer and wrap it in a device handle
fn open_device(
    programmer: &str,
    device: DeviceConfig,
) -> Result<UpdiDevice<Box<dyn UpdiTransport>>, CommandError> {
    let transport = programmers::open_programmer(programmer, &device)
        .map_err(|e| CommandError::Init(e.to_string()))?;
    Ok(UpdiDevice::new(transport, device))
}
