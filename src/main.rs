// src/main.rs
//
// hmi-link command line: list ports, monitor the panel link, and manage the
// touch calibration file.

use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use hmi_link::device_scan;
use hmi_link::io::serial::SystemOpener;
use hmi_link::logging::{init_file_logging, stop_file_logging};
use hmi_link::settings::{default_settings_path, load_settings, LinkSettings};
use hmi_link::touch::{self, CalibrationPoints, CalibrationSource, Point, ScreenGeometry};
use hmi_link::{parse_command, tlog, ChannelState, HmiCommand, Parity, SerialChannel, StopBits};

const WELCOME: &[u8] = b"Raspberry pi HMI\r\n";

#[derive(Parser)]
#[command(name = "hmi-link")]
#[command(version)]
#[command(about = "Serial link and touch calibration tools for the HMI panel")]
struct Cli {
    /// Settings file (defaults to <config dir>/hmi-link/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate serial devices
    Ports {
        /// Print as JSON, with USB ids
        #[arg(long)]
        json: bool,
    },
    /// Connect to the panel, print what it sends and forward stdin to it
    Monitor {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
        #[arg(long)]
        data_bits: Option<u8>,
        /// none, odd, even or space
        #[arg(long)]
        parity: Option<Parity>,
        #[arg(long)]
        stop_bits: Option<u8>,
        /// Mirror the log into a timestamped file in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Compute a calibration from four raw samples and store it
    Calibrate {
        /// Raw "x,y" samples: top-left, top-right, bottom-right, bottom-left
        #[arg(num_args = 4, required = true)]
        points: Vec<String>,
        /// Inset of the calibration targets from the screen corners
        #[arg(long, default_value_t = 30)]
        offset: i32,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the active calibration
    ShowCalibration {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("hmi-link: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let settings_path = match cli.config {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let settings = load_settings(&settings_path)?;

    match cli.command {
        Commands::Ports { json } => ports(json),
        Commands::Monitor {
            device,
            baud,
            data_bits,
            parity,
            stop_bits,
            log_dir,
        } => {
            let mut settings = settings;
            if let Some(device) = device {
                settings.device = device;
            }
            if let Some(baud) = baud {
                settings.baud = baud;
            }
            if let Some(data_bits) = data_bits {
                settings.data_bits = data_bits;
            }
            if let Some(parity) = parity {
                settings.parity = parity;
            }
            if let Some(count) = stop_bits {
                settings.stop_bits =
                    StopBits::from_count(count).ok_or_else(|| format!("Stop bits must be 1 or 2, got {}", count))?;
            }
            let log_dir = log_dir.or_else(|| settings.log_dir.as_ref().map(PathBuf::from));
            if let Some(dir) = log_dir {
                init_file_logging(&dir)?;
            }
            let result = monitor(&settings);
            stop_file_logging();
            result
        }
        Commands::Calibrate { points, offset, file } => {
            let path = file.unwrap_or_else(|| PathBuf::from(&settings.calibration_file));
            calibrate(&points, offset, &path, settings.screen())
        }
        Commands::ShowCalibration { file } => {
            let path = file.unwrap_or_else(|| PathBuf::from(&settings.calibration_file));
            show_calibration(&path, settings.screen());
            Ok(())
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn ports(json: bool) -> Result<(), String> {
    if json {
        let devices = device_scan::describe_devices();
        let out = serde_json::to_string_pretty(&devices).map_err(|e| format!("Failed to serialize devices: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    let devices = device_scan::list_serial_devices();
    if devices.is_empty() {
        println!("No serial devices found");
    } else {
        println!("{}", device_scan::format_device_list(&devices));
    }
    Ok(())
}

fn monitor(settings: &LinkSettings) -> Result<(), String> {
    let mut channel = SerialChannel::with_opener(Arc::new(SystemOpener), settings.channel_options(), None);

    channel
        .connect(&settings.device, settings.baud)
        .map_err(|e| e.to_string())?;
    channel
        .set_params(settings.line_params())
        .map_err(|e| e.to_string())?;
    let options = channel.options();
    tlog!(
        "[serial] Lines capped at {} bytes, data bits policy {:?}",
        options.max_line_len,
        options.data_bits_policy
    );
    if let Some(id) = device_scan::resolve_usb_id(&settings.device) {
        tlog!("[serial] {} is {}", settings.device, id);
    }
    send_all(&channel, WELCOME)?;

    // stdin is read on its own thread; the poll tick below never blocks on it.
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| format!("Failed to spawn stdin reader: {}", e))?;

    let result = loop {
        if let Some(line) = channel.try_receive_line() {
            println!("<< {}", line);
            match parse_command(&line) {
                HmiCommand::Slider(value) => println!("   slider -> {}", value),
                HmiCommand::Wake => println!("   wake"),
                HmiCommand::Unknown(_) => {}
            }
        }

        match rx.try_recv() {
            Ok(line) => {
                let mut out = line.into_bytes();
                out.extend_from_slice(b"\r\n");
                if let Err(e) = send_all(&channel, &out) {
                    break Err(e);
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break Ok(()),
        }

        if channel.state() == ChannelState::Error {
            let reason = channel
                .last_fault()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "unknown fault".to_string());
            break Err(format!("Link to {} lost: {}", settings.device, reason));
        }

        std::thread::sleep(settings.poll_interval());
    };

    let stats = channel.stats();
    tlog!(
        "[serial] {} lines received ({} overwritten, {} truncated), {} bytes in, {} bytes out",
        stats.lines_received,
        stats.lines_overwritten,
        stats.lines_truncated,
        stats.bytes_received,
        stats.bytes_sent
    );
    // Already closed if the receiver faulted.
    let _ = channel.close();
    result
}

/// `send` until every byte is out.
fn send_all(channel: &SerialChannel, data: &[u8]) -> Result<(), String> {
    let mut offset = 0;
    while offset < data.len() {
        let n = channel.send(&data[offset..]).map_err(|e| e.to_string())?;
        if n == 0 {
            return Err("Serial write made no progress".to_string());
        }
        offset += n;
    }
    Ok(())
}

fn calibrate(raw: &[String], offset: i32, path: &std::path::Path, screen: ScreenGeometry) -> Result<(), String> {
    let mut points = [Point::default(); 4];
    for (slot, text) in points.iter_mut().zip(raw) {
        *slot = parse_point(text)?;
    }

    let calibration =
        touch::calibrate(CalibrationPoints::new(points, offset), screen, path).map_err(|e| e.to_string())?;
    print_calibration(&calibration);
    println!("Stored to {}", path.display());
    Ok(())
}

fn show_calibration(path: &std::path::Path, screen: ScreenGeometry) {
    let loaded = touch::load_or_default(path, screen);
    match loaded.source {
        CalibrationSource::File => println!("Calibration from {}", path.display()),
        CalibrationSource::Default => println!("Default calibration (run `hmi-link calibrate`)"),
    }
    print_calibration(&loaded.calibration);
}

fn print_calibration(calibration: &touch::TouchCalibration) {
    let c = calibration.coefficients();
    let screen = calibration.screen();
    println!("screen: {}x{}, offset {}", screen.width, screen.height, calibration.points().screen_offset);
    for (raw, target) in calibration
        .points()
        .points
        .iter()
        .zip(calibration.points().screen_targets(screen))
    {
        let mapped = calibration.map(*raw);
        println!(
            "  raw ({}, {}) -> ({}, {})  target ({}, {})",
            raw.x, raw.y, mapped.x, mapped.y, target.x, target.y
        );
    }
    println!("x = {} + raw * {} / {}", c.x_intercept, c.x_num, c.x_den);
    println!("y = {} + raw * {} / {}", c.y_intercept, c.y_num, c.y_den);
}

fn parse_point(text: &str) -> Result<Point, String> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| format!("Expected x,y but got '{}'", text))?;
    let x = x.trim().parse::<i32>().map_err(|e| format!("Bad x in '{}': {}", text, e))?;
    let y = y.trim().parse::<i32>().map_err(|e| format!("Bad y in '{}': {}", text, e))?;
    Ok(Point::new(x, y))
}
