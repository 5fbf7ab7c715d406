//! # Command Interpreter
//!
//! Bridge-side HTTP server (default port 8082).
//!
//! Receives validated command JSON from the gateway and appends the text
//! form to the command file, where the bridge's send scheduler drains it.
//! In the other direction it polls the telemetry snapshot file at 50 Hz and
//! pushes the JSON document to the gateway whenever the record changes.
//!
//! The snapshot file is the only channel to the bridge process: nothing in
//! this binary shares memory with it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crsf_bridge::command::{append_line, parse_line};
use crsf_bridge::http::{
    html_response, json_response, post_json, read_request, status_error, status_ok, write_response,
    Request,
};
use crsf_bridge::telemetry::shared_file::SnapshotRecord;
use crsf_bridge::telemetry::TelemetryDocument;

/// Poll cadence for the snapshot file.
const TELEMETRY_POLL: Duration = Duration::from_millis(20);

/// Deadline for one telemetry push to the gateway.
const PUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// CRSF command interpreter: command ingress for the bridge node and
/// telemetry push to the gateway.
#[derive(Parser)]
#[command(name = "interpreter", version, about)]
struct Args {
    /// Listen port
    #[arg(default_value_t = 8082)]
    port: u16,

    /// Gateway host to push telemetry to
    #[arg(default_value = "localhost")]
    peer_host: String,

    /// Gateway port
    #[arg(default_value_t = 8081)]
    peer_port: u16,

    /// No-telemetry bench mode (kept for CLI parity with the other nodes)
    #[arg(long)]
    notel: bool,

    /// Command file drained by the bridge
    #[arg(long, default_value = "/tmp/crsf_command.txt")]
    command_file: PathBuf,

    /// Snapshot file written by the bridge
    #[arg(long, default_value = "/tmp/crsf_telemetry.dat")]
    telemetry_file: PathBuf,
}

#[derive(Clone)]
struct InterpreterState {
    command_file: PathBuf,
}

#[derive(Deserialize)]
struct SetChannelCommand {
    channel: usize,
    value: i32,
}

#[derive(Deserialize)]
struct SetChannelsCommand {
    #[serde(rename = "channelsStr")]
    channels_str: String,
}

#[derive(Deserialize)]
struct SetModeCommand {
    mode: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    if args.notel {
        info!("Running in no-telemetry mode");
    }

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("binding port {}", args.port))?;

    info!("Interpreter listening on port {}", args.port);
    info!("Commands are written to {}", args.command_file.display());
    info!("Telemetry is pushed to {}:{}", args.peer_host, args.peer_port);

    tokio::spawn(telemetry_push_loop(
        args.telemetry_file.clone(),
        args.peer_host.clone(),
        args.peer_port,
    ));

    let state = InterpreterState {
        command_file: args.command_file,
    };

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        debug!("Connection from {}", addr);
        let state = state.clone();
        tokio::spawn(handle_client(stream, state));
    }
}

async fn handle_client(mut stream: TcpStream, state: InterpreterState) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            debug!("Bad request: {}", e);
            return;
        }
    };

    let response = route(&request, &state).await;
    write_response(&mut stream, &response).await;
}

async fn route(request: &Request, state: &InterpreterState) -> String {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") | ("GET", "/index.html") => html_response(&index_page(state)),
        ("POST", path) if path.starts_with("/api/command/") => {
            handle_command(&path["/api/command/".len()..], &request.body, state).await
        }
        _ => json_response(404, &status_error("Not Found")),
    }
}

/// Translate validated JSON into a command line and queue it.
async fn handle_command(command: &str, body: &str, state: &InterpreterState) -> String {
    let line = match command {
        "setChannel" => match serde_json::from_str::<SetChannelCommand>(body) {
            Ok(cmd) if (1..=16).contains(&cmd.channel) && (1000..=2000).contains(&cmd.value) => {
                format!("setChannel {} {}", cmd.channel, cmd.value)
            }
            Ok(_) => return json_response(400, &status_error("Invalid channel or value range")),
            Err(_) => return json_response(400, &status_error("Invalid JSON format")),
        },
        "setChannels" => match serde_json::from_str::<SetChannelsCommand>(body) {
            // The string must parse as a well-formed setChannels line
            Ok(cmd) if matches!(parse_line(&cmd.channels_str), Some(crsf_bridge::command::Command::SetChannels(_))) => {
                cmd.channels_str
            }
            _ => return json_response(400, &status_error("Invalid channels string")),
        },
        "sendChannels" => "sendChannels".to_string(),
        "setMode" => match serde_json::from_str::<SetModeCommand>(body) {
            Ok(cmd) if cmd.mode == "joystick" || cmd.mode == "manual" => {
                format!("setMode {}", cmd.mode)
            }
            _ => return json_response(400, &status_error("Invalid mode")),
        },
        _ => return json_response(404, &status_error("Unknown command")),
    };

    match append_line(&state.command_file, &line).await {
        Ok(()) => {
            info!("Command queued: {}", line);
            json_response(200, &status_ok("Command written to file"))
        }
        Err(e) => {
            warn!("Cannot queue command: {}", e);
            json_response(200, &status_error("Failed to process command"))
        }
    }
}

/// Poll the snapshot file and push changed records to the gateway.
///
/// A short or missing file is a reader racing the bridge's rewrite (or no
/// bridge at all) and is skipped; push failures are logged and the loop
/// simply tries again next tick.
async fn telemetry_push_loop(telemetry_file: PathBuf, peer_host: String, peer_port: u16) {
    let mut last_sent: Option<SnapshotRecord> = None;

    loop {
        if let Ok(bytes) = tokio::fs::read(&telemetry_file).await {
            if let Some(record) = SnapshotRecord::decode(&bytes) {
                let changed = match &last_sent {
                    Some(previous) => record.differs_from(previous),
                    None => true,
                };

                if changed {
                    let document = TelemetryDocument::from_record(&record, "UART Active");
                    match serde_json::to_string(&document) {
                        Ok(json) => {
                            match post_json(
                                &peer_host,
                                peer_port,
                                "/api/telemetry",
                                &json,
                                PUSH_TIMEOUT,
                            )
                            .await
                            {
                                Ok(_) => {
                                    last_sent = Some(record);
                                }
                                Err(e) => debug!("Telemetry push failed: {}", e),
                            }
                        }
                        Err(e) => debug!("Telemetry serialise failed: {}", e),
                    }
                }
            }
        }

        tokio::time::sleep(TELEMETRY_POLL).await;
    }
}

fn index_page(state: &InterpreterState) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><title>CRSF Interpreter</title></head>
<body>
<h1>CRSF Interpreter</h1>
<p>Command ingress for the bridge node.</p>
<p>Commands are written to: {}</p>
<p>Available endpoints:</p>
<ul>
<li>POST /api/command/setChannel - set a single channel</li>
<li>POST /api/command/setChannels - set several channels</li>
<li>POST /api/command/sendChannels - force one frame emission</li>
<li>POST /api/command/setMode - joystick or manual steering</li>
</ul>
</body></html>"#,
        state.command_file.display()
    )
}
