use std::io::Write;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use daliusb_core::{Commissioner, DaliBus, gear};
use env_logger::Env;
use log::Level;

#[derive(Parser, Debug)]
#[clap(version, about = "Commission and control DALI lighting over a Tridonic USB bridge", long_about = None)]
struct Opts {
    /// Verbose
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Discover all unaddressed gear and assign short addresses
    Commission,
    /// List every device answering on the bus
    Scan,
    /// Switch a device back to its last active level
    On {
        #[clap(value_parser = address_parser)]
        address: u8,
    },
    /// Switch a device off
    Off {
        #[clap(value_parser = address_parser)]
        address: u8,
    },
    /// Toggle a device between off and its last active level
    Toggle {
        #[clap(value_parser = address_parser)]
        address: u8,
    },
    /// Drive a device straight to an arc power level
    Level {
        #[clap(value_parser = address_parser)]
        address: u8,
        level: u8,
    },
    /// Show a device's fade time and rate
    Fade {
        #[clap(value_parser = address_parser)]
        address: u8,
    },
    /// Store the level a device comes up with after a power cut
    PowerOnLevel {
        #[clap(value_parser = address_parser)]
        address: u8,
        level: u8,
    },
}

fn address_parser(s: &str) -> Result<u8, String> {
    match s.parse::<u8>() {
        Ok(address) if address < 64 => Ok(address),
        _ => Err(format!("'{s}' is not a short address (0..=63)")),
    }
}

fn main() -> anyhow::Result<()> {
    let options = Opts::parse();

    if options.verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format(|buf, record| {
                let level = record.level();
                if level == Level::Info {
                    writeln!(buf, "{}", record.args())
                } else {
                    writeln!(buf, "{}: {}", record.level(), record.args())
                }
            })
            .init();
    }

    let mut bridge = usbh_dali::open().context("opening the DALI USB bridge")?;

    match options.command {
        Cmd::Commission => {
            let commissioner = Commissioner::new();

            let cancel = commissioner.cancel_flag();
            ctrlc::set_handler(move || {
                log::warn!("interrupted, winding commissioning down");
                cancel.store(true, Ordering::Relaxed);
            })
            .context("setting Ctrl-C handler")?;

            log::info!("Commissioning the bus, this takes a few seconds per device");
            let assignments = commissioner.run(&mut bridge)?;
            if assignments.is_empty() {
                log::info!("No unaddressed gear found");
            }
            for assignment in assignments {
                log::info!(
                    "short address {:2} <- search address {:#08x}",
                    assignment.short_address,
                    assignment.search_address
                );
            }
        }
        Cmd::Scan => {
            log::info!("Scanning all 64 short addresses");
            let devices = gear::scan(&mut bridge)?;
            if devices.is_empty() {
                log::info!("Nothing answered; is the bus commissioned?");
            }
            for device in devices {
                log::info!("{device}");
            }
        }
        Cmd::On { address } => {
            let mut device = attached(&mut bridge, address)?;
            device.on(&mut bridge)?;
            log::info!("gear {address} on, level {:?}", device.level);
        }
        Cmd::Off { address } => {
            let mut device = attached(&mut bridge, address)?;
            device.off(&mut bridge)?;
            log::info!("gear {address} off");
        }
        Cmd::Toggle { address } => {
            let mut device = attached(&mut bridge, address)?;
            device.toggle(&mut bridge)?;
            log::info!("gear {address} toggled, level {:?}", device.level);
        }
        Cmd::Level { address, level } => {
            let mut device = attached(&mut bridge, address)?;
            device.set_level(&mut bridge, level)?;
            log::info!("gear {address} driven to {:?}", device.level);
        }
        Cmd::Fade { address } => {
            let mut device = attached(&mut bridge, address)?;
            match device.query_fade(&mut bridge)? {
                Some(fade) => log::info!("gear {address} fade: {fade}"),
                None => log::info!("gear {address} gave no fade answer"),
            }
        }
        Cmd::PowerOnLevel { address, level } => {
            let mut device = attached(&mut bridge, address)?;
            device.set_power_on_level(&mut bridge, level)?;
            let stored = device.query_power_on_level(&mut bridge)?;
            log::info!("gear {address} power-on level now {stored:?}");
        }
    }

    Ok(())
}

fn attached<B: DaliBus>(bus: &mut B, address: u8) -> anyhow::Result<gear::Gear> {
    match gear::Gear::discover(bus, address)? {
        Some(device) => Ok(device),
        None => bail!("no gear answered on short address {address}"),
    }
}
