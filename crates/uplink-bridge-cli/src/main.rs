//! # uplink-bridge CLI
//!
//! Command-line utilities for checking topics and captured uplinks offline.

use anyhow::{Context, Result};
use serde_json::json;
use std::env;
use uplink_bridge_core::OutputMode;
use uplink_bridge_proto::{DeviceTopic, Extracted, UplinkDecoder};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "topic" => {
            if args.len() < 5 {
                eprintln!("Usage: uplink-bridge topic <tenant_id> <app_id> <dev_id>");
                std::process::exit(1);
            }
            let topic = DeviceTopic::new(args[2].as_str(), args[3].as_str(), args[4].as_str());
            println!("{}", topic.uplink());
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: uplink-bridge decode <file> [field]");
                std::process::exit(1);
            }
            let path = &args[2];
            let payload =
                std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
            let mode = OutputMode::from_parameter(args.get(3).map_or("", String::as_str));

            match UplinkDecoder::new(mode)
                .decode(&payload)
                .context("Failed to decode uplink")?
            {
                Extracted::Value { value, timestamp } => {
                    let out = json!({ "value": value, "timestamp": timestamp });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                Extracted::FieldMissing => {
                    eprintln!("field not present");
                    std::process::exit(2);
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"uplink-bridge CLI

USAGE:
    uplink-bridge <COMMAND> [OPTIONS]

COMMANDS:
    topic <tenant> <app> <dev>  Print the uplink topic for a device
    decode <file> [field]       Decode a captured uplink; whole payload if no field
    help                        Show this help message

EXAMPLES:
    uplink-bridge topic ttn demo-app eui-70b3d57ed0000001
    uplink-bridge decode uplink.json current
"#
    );
}
