use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dsmr_rs::device::SerialSettings;
use dsmr_rs::logging::{init_logger_with_level, level_from_verbosity};
use dsmr_rs::util::decode_hex;
use dsmr_rs::{
    decrypt_frames, log_info, DeviceConfiguration, DeviceHandle, DeviceListener, DsmrError,
    LinkConfig, MeterDescriptor, RecordBatch, SmartyKey, StateChange,
};

#[derive(Parser)]
#[command(name = "dsmr-cli")]
#[command(about = "CLI tool for DSMR/P1 smart meter ports")]
struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a meter on a serial port
    Serial {
        port: String,
        /// Fix the port speed instead of auto detecting it
        #[arg(short, long)]
        baudrate: Option<u32>,
        #[command(flatten)]
        options: ReadOptions,
    },
    /// Read a meter exposed over TCP
    Tcp {
        host: String,
        port: u16,
        #[command(flatten)]
        options: ReadOptions,
    },
    /// Read a meter described by a JSON configuration file
    Run { config: PathBuf },
    /// Decrypt a captured Smarty byte stream and print the telegrams
    Decrypt {
        /// File with the raw bytes, or hex text with --hex
        input: PathBuf,
        #[arg(short, long)]
        key: String,
        #[arg(long)]
        hex: bool,
    },
}

#[derive(clap::Args)]
struct ReadOptions {
    /// Smarty decryption key (32 hex digits)
    #[arg(short, long)]
    key: Option<String>,
    /// Accept telegrams with a bad CRC
    #[arg(short, long)]
    lenient: bool,
}

struct PrintListener;

impl DeviceListener for PrintListener {
    fn state_changed(&mut self, change: &StateChange) -> Result<(), DsmrError> {
        log_info(&format!(
            "{} -> {} ({})",
            change.old, change.new, change.details
        ));
        Ok(())
    }

    fn records_received(&mut self, batch: &RecordBatch) -> Result<(), DsmrError> {
        println!("# {} {}", batch.at.to_rfc3339(), batch.details);
        for object in &batch.objects {
            println!("{object}");
        }
        Ok(())
    }

    fn meter_discovered(&mut self, meter: &MeterDescriptor) -> Result<(), DsmrError> {
        println!("# discovered {meter}");
        Ok(())
    }
}

fn configuration(link: LinkConfig, options: ReadOptions) -> DeviceConfiguration {
    let mut config = DeviceConfiguration::new(link);
    config.decryption_key = options.key;
    config.lenient_mode = options.lenient;
    config
}

async fn run_device(config: DeviceConfiguration) -> anyhow::Result<()> {
    let device = DeviceHandle::from_configuration(&config)?;
    device.subscribe(PrintListener).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    log_info("Shutting down");
    device.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger_with_level(level_from_verbosity(cli.verbose));

    match cli.command {
        Commands::Serial {
            port,
            baudrate,
            options,
        } => {
            let speed_sequence = match baudrate {
                Some(115_200) => vec![SerialSettings::HIGH_SPEED],
                Some(9_600) => vec![SerialSettings::LOW_SPEED],
                Some(other) => anyhow::bail!("unsupported P1 baud rate {other}"),
                None => Vec::new(),
            };
            let link = LinkConfig::Serial {
                port,
                speed_sequence,
            };
            run_device(configuration(link, options)).await?;
        }
        Commands::Tcp {
            host,
            port,
            options,
        } => {
            run_device(configuration(LinkConfig::Tcp { host, port }, options)).await?;
        }
        Commands::Run { config } => {
            let config = DeviceConfiguration::from_json_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            run_device(config).await?;
        }
        Commands::Decrypt { input, key, hex } => {
            let key = SmartyKey::from_hex(&key)?;
            let raw = std::fs::read(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let bytes = if hex {
                decode_hex(&String::from_utf8_lossy(&raw))?
            } else {
                raw
            };

            let telegrams = decrypt_frames(&key, &bytes);
            if telegrams.is_empty() {
                anyhow::bail!("no frame could be decrypted");
            }
            for telegram in telegrams {
                println!("# frame counter {}", telegram.frame_counter);
                print!("{}", String::from_utf8_lossy(&telegram.payload));
            }
        }
    }

    Ok(())
}
