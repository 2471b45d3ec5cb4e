use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use adbrs::adb::{RsaSigner, Signer};
use adbrs::fastboot::FastbootClient;
use adbrs::transport::usb::{DeviceFilter, InterfaceMatcher, UsbTransport};
use adbrs::transport::tcp::TcpTransport;
use adbrs::transport::Transport;
use adbrs::util::{config, logging};
use adbrs::Session;

#[derive(Parser)]
#[command(name = "adbrs", about = "A minimal ADB/Fastboot client built on the adbrs library")]
struct Cli {
    /// Connect over TCP to host[:port] instead of USB.
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Select the Nth matching USB device when more than one is attached.
    #[arg(long, default_value_t = 0, global = true)]
    device_index: usize,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the device's connect banner (state + build properties).
    Info,
    /// Run a command via the shell: service and print its output.
    Shell { command: String },
    /// Push a local file or directory to the device.
    Push { local: PathBuf, remote: String },
    /// Pull a file from the device to a local path.
    Pull { remote: String, local: PathBuf },
    /// List a directory on the device.
    Ls { remote: String },
    /// Stat a single path on the device.
    Stat { remote: String },
    /// Reboot the device, optionally into a named target (e.g. "bootloader").
    Reboot { target: Option<String> },
    /// Flash a local image to a partition, in fastboot mode.
    FastbootFlash { partition: String, image: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = match cli.verbose {
        0 => logging::LogVerbosity::Normal,
        1 => logging::LogVerbosity::Verbose,
        _ => logging::LogVerbosity::Debug,
    };
    logging::init_logger(verbosity);

    match cli.command {
        Commands::FastbootFlash { partition, image } => run_fastboot_flash(&cli, &partition, &image),
        other => run_adb_command(&cli, other),
    }
}

fn open_adb_transport(cli: &Cli) -> Result<Box<dyn Transport>> {
    if let Some(serial) = &cli.serial {
        let t = TcpTransport::connect(serial, Duration::from_millis(10_000))
            .context("connecting over TCP")?;
        return Ok(Box::new(t));
    }
    let filter = DeviceFilter { device_index: Some(cli.device_index), ..Default::default() };
    let t = UsbTransport::open(InterfaceMatcher::ADB, &filter).context("opening USB ADB interface")?;
    Ok(Box::new(t))
}

fn open_fastboot_transport(cli: &Cli) -> Result<Box<dyn Transport>> {
    if let Some(serial) = &cli.serial {
        let t = TcpTransport::connect(serial, Duration::from_millis(10_000))
            .context("connecting over TCP")?;
        return Ok(Box::new(t));
    }
    let filter = DeviceFilter { device_index: Some(cli.device_index), ..Default::default() };
    let t = UsbTransport::open(InterfaceMatcher::FASTBOOT, &filter).context("opening USB fastboot interface")?;
    Ok(Box::new(t))
}

fn load_signer(state: &config::State) -> Result<Box<dyn Signer>> {
    let path = state.private_key_path.clone().unwrap_or_else(config::default_key_path);
    let hostname = hostname();
    let signer = RsaSigner::load_or_generate(&path, format!("{hostname}@adbrs")).context("loading signing key")?;
    Ok(Box::new(signer))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "adbrs".to_string())
}

fn run_adb_command(cli: &Cli, command: Commands) -> Result<()> {
    let state = config::load_state();
    let transport = open_adb_transport(cli)?;
    let signer = load_signer(&state)?;
    let banner = state.default_banner.clone().unwrap_or_else(hostname);
    let mut session = Session::connect(
        transport,
        &banner,
        &[signer],
        Duration::from_millis(state.connect_timeout_ms),
        Duration::from_millis(state.auth_timeout_ms),
    )
    .context("connecting to device")?;

    match command {
        Commands::Info => {
            println!("state: {}", session.device_state());
            for prop in session.properties() {
                println!("{prop}");
            }
        }
        Commands::Shell { command } => {
            print!("{}", session.shell(&command)?);
        }
        Commands::Push { local, remote } => {
            let bar = progress_bar();
            session.push(&local, &remote, Some(&mut |cur, total| bar.set_position_checked(cur, total)))?;
            bar.finish_and_clear();
        }
        Commands::Pull { remote, local } => {
            let bar = progress_bar();
            session.pull(&remote, &local, Some(&mut |cur, total| bar.set_position_checked(cur, total)))?;
            bar.finish_and_clear();
        }
        Commands::Ls { remote } => {
            for entry in session.list(&remote)? {
                println!("{:o} {:>10} {}", entry.mode, entry.size, entry.name);
            }
        }
        Commands::Stat { remote } => {
            let (mode, size, mtime) = session.stat(&remote)?;
            println!("mode={mode:o} size={size} mtime={mtime}");
        }
        Commands::Reboot { target } => {
            session.reboot(target.as_deref().unwrap_or(""))?;
        }
        Commands::FastbootFlash { .. } => unreachable!("handled by run_fastboot_flash"),
    }

    session.close()?;
    Ok(())
}

fn run_fastboot_flash(cli: &Cli, partition: &str, image: &std::path::Path) -> Result<()> {
    let transport = open_fastboot_transport(cli)?;
    let mut client = FastbootClient::new(transport, 1024);
    let bar = progress_bar();
    client.flash_from_file(partition, image, Some(&mut |cur, total| bar.set_position_checked(cur, total)))?;
    bar.finish_and_clear();
    println!("flashed {partition} from {}", image.display());
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

trait ProgressBarExt {
    fn set_position_checked(&self, current: u64, total: u64);
}

impl ProgressBarExt for ProgressBar {
    fn set_position_checked(&self, current: u64, total: u64) {
        if self.length() != Some(total) {
            self.set_length(total);
        }
        self.set_position(current);
    }
}
