#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for poking at a mail server under test

use clap::{Parser, Subcommand};
use mailtest_transport::{Connection, TransportConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailtest-cli")]
#[command(about = "Probe and talk to a plaintext or TLS text-protocol server")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Port to use instead of MAILTEST_PORT
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Command {
    /// Report whether the server greets within one second
    Probe,

    /// Connect and immediately disconnect
    Connect,

    /// Optionally send a line, then print the response
    Chat {
        /// Text to send; CRLF is appended
        #[arg(long)]
        send: Option<String>,

        /// Read until any of these terminators shows up
        #[arg(long)]
        until: Vec<String>,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    command: &'a str,
    host: &'a str,
    port: u16,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = TransportConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let report = match &args.command {
        Command::Probe => cmd_probe(&config),
        Command::Connect => cmd_connect(&config),
        Command::Chat { send, until } => cmd_chat(&config, send.as_deref(), until)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_probe(config: &TransportConfig) -> Report<'_> {
    let mut conn = Connection::from_config(config);
    let address = mailtest_transport::resolve(&config.host, config.allow_ipv6)
        .ok()
        .flatten();
    let ok = address.is_some() && conn.probe_port(address, config.port);
    Report {
        command: "probe",
        host: &config.host,
        port: config.port,
        ok,
        response: None,
    }
}

fn cmd_connect(config: &TransportConfig) -> Report<'_> {
    let mut conn = Connection::from_config(config);
    let ok = conn.connect_config(config);
    conn.disconnect();
    Report {
        command: "connect",
        host: &config.host,
        port: config.port,
        ok,
        response: None,
    }
}

fn cmd_chat<'a>(
    config: &'a TransportConfig,
    send: Option<&str>,
    until: &[String],
) -> anyhow::Result<Report<'a>> {
    let mut conn = Connection::from_config(config);
    if !conn.connect_config(config) {
        anyhow::bail!("Could not connect to {}:{}", config.host, config.port);
    }

    if let Some(line) = send {
        conn.send(&format!("{line}\r\n"))?;
    }

    let response = if until.is_empty() {
        conn.receive()?
    } else {
        conn.read_until_any(until)?
    };

    Ok(Report {
        command: "chat",
        host: &config.host,
        port: config.port,
        ok: true,
        response: Some(response),
    })
}

fn print_report(report: &Report<'_>) {
    match report.command {
        "chat" => {
            if let Some(response) = &report.response {
                print!("{response}");
            }
        }
        _ => {
            let state = if report.ok { "open" } else { "closed" };
            println!("{}:{} {state}", report.host, report.port);
        }
    }
}
