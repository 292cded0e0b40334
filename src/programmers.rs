//! Programmer registration and dispatch
//!
//! Every programmer ends up as a boxed [`UpdiTransport`], so the commands
//! never need to know which one is in use.

use updiprog_core::config::DeviceConfig;
use updiprog_core::link::UpdiTransport;

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "Emulated UPDI target for testing (locked=<0|1>,busy=<polls>)",
    });

    #[cfg(feature = "linux-gpio")]
    programmers.push(ProgrammerInfo {
        name: "linux_gpio",
        aliases: &["linux-gpio", "gpio"],
        description: "Bit-banged UPDI on a Linux GPIO line (dev=/dev/gpiochipN,pin=<line>,bitlen=<us>)",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");
    for p in &programmers {
        help.push_str(&format!("  {:12} - {}\n", p.name, p.description));
    }
    help
}

/// Generate a short list of programmer names for CLI help
pub fn programmer_names_short() -> String {
    let programmers = available_programmers();
    let names: Vec<&str> = programmers.iter().map(|p| p.name).collect();
    names.join(", ")
}

/// Resolve a name or alias to the canonical programmer name
pub fn find_programmer(name: &str) -> Option<&'static str> {
    available_programmers()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name))
        .map(|p| p.name)
}

/// Open the programmer named by `programmer`
///
/// The string can be just the name (e.g., "dummy") or include parameters
/// (e.g., "linux_gpio:dev=/dev/gpiochip0,pin=5"). The emulated target takes
/// its memory map from `device`.
#[allow(unused_variables)]
pub fn open_programmer(
    programmer: &str,
    device: &DeviceConfig,
) -> Result<Box<dyn UpdiTransport>, Box<dyn std::error::Error>> {
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = match find_programmer(name) {
        Some(n) => n,
        None => return Err(unknown_programmer_error(name)),
    };

    match canonical_name {
        #[cfg(feature = "dummy")]
        "dummy" => {
            let mut config = parse_dummy_options(&options)?;
            config.device = device.clone();
            log::info!("Using emulated UPDI target");
            Ok(Box::new(updiprog_dummy::DummyUpdi::new(config)))
        }

        #[cfg(feature = "linux-gpio")]
        "linux_gpio" => {
            log::info!("Opening Linux GPIO programmer...");
            let transport = updiprog_linux_gpio::open_linux_gpio(&options).map_err(|e| {
                format!(
                    "Failed to open Linux GPIO line: {}\n\
                     Make sure the gpiochip exists and you have read/write permissions.",
                    e
                )
            })?;
            Ok(transport)
        }

        _ => Err(unknown_programmer_error(name)),
    }
}

#[cfg(feature = "dummy")]
fn parse_dummy_options(
    options: &[(&str, &str)],
) -> Result<updiprog_dummy::DummyConfig, String> {
    let mut config = updiprog_dummy::DummyConfig::default();
    for (key, value) in options {
        match *key {
            "locked" => config.locked = matches!(*value, "1" | "true" | "yes"),
            "busy" => {
                config.busy_polls = value
                    .parse()
                    .map_err(|_| format!("Invalid busy value: {}", value))?;
            }
            _ => log::warn!("dummy: Unknown option: {}={}", key, value),
        }
    }
    Ok(config)
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.push_str("\nUse 'updiprog list-programmers' for more details");
    msg.into()
}
