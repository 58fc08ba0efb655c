//! bkwire - binary wire codec tool
//!
//! Runs an echo listener, sends single messages and dumps captured frames.

mod commands;
mod config;

use bkwire_protocol::{Message, MessageKind};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bkwire")]
#[command(about = "Binary wire codec tool: echo listener, sender and frame dump")]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, env = "BKWIRE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the echo listener
    Serve {
        /// Address to bind (overrides config)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Send one message and print the reply
    Send {
        /// Listener address
        #[arg(short, long, default_value = "127.0.0.1:7411")]
        addr: SocketAddr,

        #[command(flatten)]
        message: MessageArgs,
    },

    /// Append an encoded frame to a file
    Encode {
        /// Output file
        out: PathBuf,

        #[command(flatten)]
        message: MessageArgs,
    },

    /// Decode and print every frame in a file
    Dump {
        /// Capture file
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct MessageArgs {
    /// Command name
    #[arg(short, long, default_value = "")]
    command: String,

    /// Payload text
    #[arg(short, long, default_value = "")]
    payload: String,

    /// Sequence number
    #[arg(short, long, default_value = "1")]
    sequence: u32,

    /// Message kind (0 = request, 1 = response, 2 = error)
    #[arg(short, long, default_value = "0")]
    kind: u32,
}

impl MessageArgs {
    fn into_message(self, version: u16) -> Message {
        Message::new(
            self.sequence,
            MessageKind(self.kind),
            self.command,
            self.payload,
        )
        .with_version(version)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(path) = &cli.config {
        tracing::debug!("Loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(addr) = bind {
                config.network.bind_addr = addr;
            }
            tracing::info!("Starting bkwire echo listener");
            tracing::info!(
                "  Protocol version: {:#06x}",
                config.wire.protocol_version
            );
            tracing::info!(
                "  Limits: command {} bytes, payload {} bytes",
                config.wire.max_command_len,
                config.wire.max_payload_len
            );
            commands::serve(&config)?;
        }
        Commands::Send { addr, message } => {
            let msg = message.into_message(config.wire.protocol_version);
            match commands::send(addr, &config, &msg) {
                Ok(reply) => commands::print_message(&reply),
                Err(e) => {
                    eprintln!("{}: {}", "Send failed".red(), e);
                    return Err(e.into());
                }
            }
        }
        Commands::Encode { out, message } => {
            let msg = message.into_message(config.wire.protocol_version);
            let n = commands::encode_to_file(&out, &config.wire, &msg)?;
            println!("{} {} bytes to {}", "Wrote".green(), n, out.display());
        }
        Commands::Dump { file } => {
            let dump = commands::dump(&file, &config.wire)?;
            for msg in &dump.messages {
                commands::print_message(msg);
            }
            println!("{} frame(s)", dump.messages.len());
            if dump.trailing > 0 {
                eprintln!(
                    "{}: {} trailing bytes of an incomplete frame",
                    "Warning".yellow(),
                    dump.trailing
                );
            }
        }
    }

    Ok(())
}
