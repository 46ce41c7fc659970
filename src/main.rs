use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use heatmiser_rs::logging::{log_debug, log_warn};
use heatmiser_rs::network::{ReadAll, ReadField, ReadTempState, SetField, SyncTime};
use heatmiser_rs::util::{decode_hex, pretty_hex};
use heatmiser_rs::{init_logger, log_info, FieldValue, Network, NetworkConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "heatmiser-cli")]
#[command(about = "CLI tool for Heatmiser V3 thermostats")]
struct Cli {
    /// Network description in JSON.
    #[arg(short, long, default_value = "heatmiser.json")]
    config: PathBuf,

    /// Serial port, overriding the one in the configuration.
    #[arg(short, long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reads the whole DCB of one or every device.
    ReadAll { device: Option<String> },
    Get {
        device: String,
        field: String,
    },
    Set {
        device: String,
        field: String,
        value: String,
        /// Treat the value as hex bytes, for schedules and the clock.
        #[arg(long)]
        raw: bool,
    },
    /// Writes local time to one or every device.
    SyncTime { device: Option<String> },
    /// Shows what each thermostat is regulating to.
    Status,
}

fn parse_value(value: &str, raw: bool) -> anyhow::Result<FieldValue> {
    if raw {
        return Ok(FieldValue::Raw(decode_hex(value)?));
    }
    let n = value
        .parse::<u16>()
        .with_context(|| format!("{value} is not a number; use --raw for byte values"))?;
    Ok(FieldValue::Int(n))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let mut config = NetworkConfig::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    log_debug(&format!("Loaded {} devices from {}", config.devices.len(), cli.config.display()));
    let mut network = Network::from_config(&config).context("opening network")?;

    match cli.command {
        Commands::ReadAll { device: Some(name) } => {
            let errors = network.run(&name, &ReadAll).await?;
            for e in errors {
                log_warn(&e.to_string());
            }
            let device = network.device(&name)?;
            println!("{}", pretty_hex(device.raw_data(), 16));
        }
        Commands::ReadAll { device: None } => {
            for (name, result) in network.for_each(&ReadAll).await {
                match result {
                    Ok(errors) => println!("{name}: read, {} bad fields", errors.len()),
                    Err(e) => println!("{name}: {e}"),
                }
            }
        }
        Commands::Get { device, field } => {
            let value = network.run(&device, &ReadField(field.clone())).await?;
            println!("{device} {field} = {value}");
        }
        Commands::Set {
            device,
            field,
            value,
            raw,
        } => {
            let value = parse_value(&value, raw)?;
            network.run(&device, &SetField(field.clone(), value)).await?;
            log_info(&format!("{device} {field} written"));
        }
        Commands::SyncTime { device: Some(name) } => {
            let time = network.run(&name, &SyncTime).await?;
            println!("{name}: day {} {:02}:{:02}:{:02}", time.day, time.hour, time.minute, time.second);
        }
        Commands::SyncTime { device: None } => {
            let mut failed = 0;
            for (name, result) in network.for_each(&SyncTime).await {
                match result {
                    Ok(_) => println!("{name}: synced"),
                    Err(e) => {
                        failed += 1;
                        println!("{name}: {e}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} devices could not be synced");
            }
        }
        Commands::Status => {
            for (name, result) in network.for_each(&ReadTempState).await {
                match result {
                    Ok(state) => println!("{name}: {state}"),
                    Err(e) => println!("{name}: {e}"),
                }
            }
        }
    }

    Ok(())
}
