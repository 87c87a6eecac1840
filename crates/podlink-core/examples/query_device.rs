//! Device Query Tool
//!
//! Opens a session on a serial port, flashes the LED and reads the
//! serial number. Useful for checking wiring and firmware responses.
//!
//! Usage:
//!   cargo run --example query_device -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyACM0)
//!   --config FILE     JSON session configuration
//!   --timeout MS      Response timeout in ms (default: 5000)
//!   --get PARAM       Parameter to read (default: SER_NUMBER)
//!
//! Set RUST_LOG=podlink_core=debug to see every frame.

use anyhow::Context;
use podlink_core::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name = "/dev/ttyACM0".to_string();
    let mut config_path: Option<PathBuf> = None;
    let mut timeout_ms: Option<u64> = None;
    let mut param = Parameter::SerialNumber;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = args[i].clone();
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    timeout_ms = args[i].parse().ok();
                }
            }
            "--get" | "-g" => {
                i += 1;
                if i < args.len() {
                    param = args[i].parse()?;
                }
            }
            arg if !arg.starts_with('-') => {
                port_name = arg.to_string();
            }
            other => {
                eprintln!("Unknown option: {}", other);
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let mut config = match &config_path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(ms) = timeout_ms {
        config.timeout_ms = ms;
    }

    println!("Configuration:");
    println!("  Port:       {}", port_name);
    println!("  Baud rate:  {}", config.serial.baud_rate);
    println!("  Timeout:    {}ms", config.timeout_ms);
    println!("  Checksum:   {:?}", config.checksum);
    println!();

    let session = DeviceSession::open(&port_name, config)
        .with_context(|| format!("opening {}", port_name))?;

    session.led(true).await.context("LED on")?;
    let value = session.get_param(param).await;
    session.led(false).await.context("LED off")?;

    match value {
        Ok(value) => println!("{} = {}", param, value),
        Err(e) => println!("{} failed: {}", param, e),
    }

    let stats = session.stats();
    println!(
        "Frames sent: {}, lines received: {}, accepted: {}, rejected: {}",
        stats.frames_sent, stats.lines_received, stats.accepted, stats.rejected
    );

    session.close().await;
    Ok(())
}
