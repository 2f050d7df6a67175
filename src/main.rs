mod net;
mod protocol;

use crate::net::{
    CommandDispatcher, Delivery, DeviceLink, Endpoint, ExchangeResult, LinkConfig, DEFAULT_HOST,
    DEFAULT_PORT,
};
use crate::protocol::{Command, Switch};
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumenctl")]
#[command(about = "Remote control for Lumen wireless lighting nodes")]
#[command(version = "0.1.0")]
struct Cli {
    /// Node hostname or address
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Node TCP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the link before giving up
    #[arg(long, default_value_t = 5)]
    wait: u64,

    /// Output format for one-shot commands
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Switch the lamp on or off
    Power { state: SwitchArg },

    /// Enable or disable clap detection
    Clap { state: SwitchArg },

    /// Make the node listen for the next clap pattern
    Listen,

    /// Set a fixed RGB color (0-255 per channel)
    Color { red: u8, green: u8, blue: u8 },

    /// Hand color control back to the node
    ColorAuto,

    /// Set a fixed brightness level
    Brightness { level: u8 },

    /// Let the node drive brightness from its light sensor
    BrightnessAuto,

    /// Set a fixed color temperature level
    Temp { level: u8 },

    /// Let the node drive color temperature
    TempAuto,

    /// Enable or disable the motion sensor
    Motion { state: SwitchArg },

    /// Set motion sensitivity
    MotionLevel { level: u8 },

    /// Send a raw command line to the node
    Send { line: String },

    /// Interactive console: type command lines, watch connectivity
    Console,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SwitchArg {
    On,
    Off,
}

impl From<SwitchArg> for Switch {
    fn from(arg: SwitchArg) -> Self {
        match arg {
            SwitchArg::On => Switch::On,
            SwitchArg::Off => Switch::Off,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct OutcomeReport<'a> {
    command: &'a str,
    delivered: bool,
    reply: Option<&'a str>,
}

fn command_for(cli: &Commands) -> Option<Command> {
    let command = match cli {
        Commands::Power { state } => Command::Power((*state).into()),
        Commands::Clap { state } => Command::Clap((*state).into()),
        Commands::Listen => Command::Listen,
        Commands::Color { red, green, blue } => Command::Color {
            red: *red,
            green: *green,
            blue: *blue,
        },
        Commands::ColorAuto => Command::ColorAuto,
        Commands::Brightness { level } => Command::Brightness(*level),
        Commands::BrightnessAuto => Command::BrightnessAuto,
        Commands::Temp { level } => Command::Temperature(*level),
        Commands::TempAuto => Command::TemperatureAuto,
        Commands::Motion { state } => Command::Motion((*state).into()),
        Commands::MotionLevel { level } => Command::MotionLevel(*level),
        Commands::Send { line } => Command::Raw(line.clone()),
        Commands::Console => return None,
    };
    Some(command)
}

async fn wait_for_link(link: &DeviceLink, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if link.is_connected() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    link.is_connected()
}

async fn run_one_shot(
    link: DeviceLink,
    delivery: Delivery,
    command: Command,
    wait: Duration,
    format: OutputFormat,
) -> Result<()> {
    if !wait_for_link(&link, wait).await {
        bail!(
            "node at {} is unreachable (waited {}s)",
            link.endpoint(),
            wait.as_secs()
        );
    }

    let line = command.to_line();
    let endpoint_label = link.endpoint().to_string();
    let dispatcher = CommandDispatcher::new(link, delivery);
    let (tx, rx) = tokio::sync::oneshot::channel();
    dispatcher.send_and_receive(line.clone(), move |outcome| {
        let _ = tx.send(outcome);
    });
    let outcome = rx
        .await
        .map_err(|_| anyhow!("dispatcher dropped the command"))?;

    match outcome {
        ExchangeResult::Sent(reply) => {
            let reply = reply.as_deref().map(str::trim_end);
            match format {
                OutputFormat::Text => match reply {
                    Some(text) => println!("{}", text),
                    None => println!("(no reply)"),
                },
                OutputFormat::Json => {
                    let report = OutcomeReport {
                        command: line.trim_end(),
                        delivered: true,
                        reply,
                    };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Ok(())
        }
        ExchangeResult::NotSent => bail!("node dropped the session mid-command"),
        ExchangeResult::NotConnected => bail!("node at {} went offline", endpoint_label),
    }
}

async fn run_console(link: DeviceLink, delivery: Delivery) -> Result<()> {
    link.on_connectivity_change(|event| {
        let label = if event.connected {
            "link up"
        } else {
            "link down"
        };
        println!("[{}] {}", event.at.strftime("%H:%M:%S"), label);
    });

    // no event fires until the first real transition, so take one
    // reading by hand
    println!(
        "lumenctl console: node {} is {}",
        link.endpoint(),
        link.state().as_str()
    );
    println!("type command lines (\"power on\", \"color 255 0 64\", ...); quit to exit");

    let dispatcher = CommandDispatcher::new(link, delivery);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }

        let wire = Command::Raw(trimmed.to_string()).to_line();
        dispatcher.send_and_receive(wire, |outcome| match outcome {
            ExchangeResult::Sent(Some(reply)) => println!("< {}", reply.trim_end()),
            ExchangeResult::Sent(None) => println!("< (no reply)"),
            ExchangeResult::NotSent => println!("! send failed, link dropped"),
            ExchangeResult::NotConnected => println!("! not connected"),
        });
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumenctl=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let endpoint = Endpoint::resolve(&cli.host, cli.port).await;
    if !endpoint.is_resolved() {
        bail!("cannot resolve node address {}:{}", cli.host, cli.port);
    }

    let delivery = Delivery::start();
    let link = DeviceLink::start(endpoint, LinkConfig::default(), delivery.clone());

    match command_for(&cli.command) {
        Some(command) => {
            run_one_shot(
                link,
                delivery,
                command,
                Duration::from_secs(cli.wait),
                cli.format,
            )
            .await
        }
        None => run_console(link, delivery).await,
    }
}
