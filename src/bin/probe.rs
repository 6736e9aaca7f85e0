//! Audio Device Prober
//!
//! Initializes the audio system and prints host APIs, devices and the
//! configured stream defaults. Pass `--json` for machine-readable output.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_io_bridge::config::BridgeConfig;
use audio_io_bridge::AudioSystem;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let json = std::env::args().any(|arg| arg == "--json");

    let system = AudioSystem::initialize()?;
    tracing::info!("audio system initialized on engine '{}'", system.engine_name());

    let mut hosts = Vec::new();
    for index in 0..system.host_api_count()? {
        hosts.push(system.host_api_info(index)?);
    }
    let mut devices = Vec::new();
    for index in 0..system.device_count()? {
        devices.push(system.device_info(index)?);
    }

    let default_input = system.default_input_device().map(|d| d.index).ok();
    let default_output = system.default_output_device().map(|d| d.index).ok();

    if json {
        let report = serde_json::json!({
            "engine": system.engine_name(),
            "host_apis": hosts,
            "devices": devices,
            "default_input_device": default_input,
            "default_output_device": default_output,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n=== Host APIs ===");
        for host in &hosts {
            println!(
                "  [{}] {} ({:?}, {} devices)",
                host.index, host.name, host.type_id, host.device_count
            );
        }

        println!("\n=== Audio Devices ===");
        for device in &devices {
            let mut markers = Vec::new();
            if Some(device.index) == default_input {
                markers.push("default input");
            }
            if Some(device.index) == default_output {
                markers.push("default output");
            }
            let marker = if markers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", markers.join(", "))
            };
            println!("  [{}] {}{}", device.index, device.name, marker);
            println!(
                "      in: {} ch, out: {} ch, default rate: {} Hz",
                device.max_input_channels, device.max_output_channels, device.default_sample_rate
            );
            println!(
                "      latency: {:.1}..{:.1} ms",
                device.default_low_output_latency * 1000.0,
                device.default_high_output_latency * 1000.0
            );
        }

        let config = BridgeConfig::load()?;
        println!("\n=== Stream Defaults ===");
        println!("  sample rate: {} Hz", config.sample_rate);
        println!("  channels: {}", config.channels);
        println!("  format: {}", config.sample_format);
        println!("  frames per buffer: {}", config.frames_per_buffer);
        println!();
    }

    system.terminate();
    Ok(())
}
