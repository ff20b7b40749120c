use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::info;
use serialport::Parity;
use structopt::StructOpt;

use blasher::hexdump::{save_hexdump, DEFAULT_LINE_WIDTH};
use blasher::nvm::NvmClient;
use blasher::ports::find_cp2102n_ports;
use blasher::serial::Port;
use blasher::stm32::{self, pulse_nrst};
use blasher::Error;

mod cli;

use cli::{Command, FlashOpts, NvmCommand, NvmReadOpts, Opts};

/// Byte timeout used for both device protocols.
const PORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Opening the port glitches NRST through the coupling cap; the target
/// needs a moment before it is talked to.
const OPEN_SETTLE: Duration = Duration::from_secs(1);

/// Delay between the NRST pulse and the application serving NVM requests.
const BOOT_DELAY: Duration = Duration::from_secs(7);

fn main() -> Result<(), anyhow::Error> {
    pretty_env_logger::init();

    let opts = Opts::from_args();

    match &opts.command {
        Command::Ports => list_ports(),
        Command::Flash(flash) => flash_firmware(&opts, flash),
        Command::Nvm(command) => nvm_command(&opts, command),
    }
}

fn list_ports() -> Result<(), anyhow::Error> {
    let ports = find_cp2102n_ports()?;

    if ports.is_empty() {
        println!("No CP2102N devices found");
    } else {
        for name in ports {
            println!("{}", name);
        }
    }

    Ok(())
}

/// Uses the port given on the command line, falling back to the first
/// CP2102N bridge the OS reports.
fn resolve_port(opts: &Opts) -> Result<String, anyhow::Error> {
    if let Some(name) = &opts.serial_port {
        return Ok(name.clone());
    }

    match find_cp2102n_ports()?.into_iter().next() {
        Some(name) => {
            info!("autodetected CP2102N on {}", name);
            Ok(name)
        }
        None => anyhow::bail!("no CP2102N device found, pass --port to select one manually"),
    }
}

fn flash_firmware(opts: &Opts, flash: &FlashOpts) -> Result<(), anyhow::Error> {
    let image = with_extension(&flash.firmware, "bin");
    let name = resolve_port(opts)?;

    let mut port = Port::open(&name, opts.baud_rate, Parity::Even, PORT_TIMEOUT)?;
    thread::sleep(OPEN_SETTLE);

    match stm32::flash_image(&mut port, &image, flash.base_addr) {
        Ok(()) => {
            println!(
                "Firmware update successful ({} at {:#010x})",
                image.display(),
                flash.base_addr
            );
            Ok(())
        }
        Err(e @ Error::SyncFailed(_)) => {
            Err(anyhow::Error::new(e).context("ensure BOOT0 is raised, then retry"))
        }
        Err(e) => Err(e.into()),
    }
}

fn nvm_command(opts: &Opts, command: &NvmCommand) -> Result<(), anyhow::Error> {
    let name = resolve_port(opts)?;
    let mut port = Port::open(&name, opts.baud_rate, Parity::None, PORT_TIMEOUT)?;

    match command {
        NvmCommand::Read(read) => nvm_read(&mut port, read),
        NvmCommand::WriteEnable => {
            thread::sleep(OPEN_SETTLE);
            NvmClient::new(&mut port).write_enable()?;
            println!("NVM writes enabled");
            Ok(())
        }
        NvmCommand::WriteDisable => {
            thread::sleep(OPEN_SETTLE);
            NvmClient::new(&mut port).write_disable()?;
            println!("NVM writes disabled");
            Ok(())
        }
    }
}

fn nvm_read(port: &mut Port, read: &NvmReadOpts) -> Result<(), anyhow::Error> {
    // Restart the target so the firmware answers from a known state.
    pulse_nrst(port, Duration::from_millis(50))?;
    thread::sleep(Duration::from_millis(50));
    thread::sleep(BOOT_DELAY);

    let mut nvm = NvmClient::new(&mut *port);
    let section = nvm.read_section(read.address, read.length, read.chunk_size)?;

    let output = with_extension(&read.output, "txt");
    save_hexdump(&section, read.address, &output, DEFAULT_LINE_WIDTH)
        .with_context(|| format!("failed to write hexdump to {}", output.display()))?;

    println!("Wrote {} bytes to {}", section.len(), output.display());
    Ok(())
}

/// Appends `ext` unless the path already ends in it, so bare filenames pick
/// up the expected extension.
fn with_extension(path: &Path, ext: &str) -> PathBuf {
    match path.extension() {
        Some(existing) if existing.to_str() == Some(ext) => path.to_path_buf(),
        _ => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        }
    }
}
