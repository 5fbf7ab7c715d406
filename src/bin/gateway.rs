//! # Command Gateway
//!
//! Operator-facing HTTP server (default port 8081).
//!
//! Validates command requests, translates them into the interpreter's JSON
//! shape and forwards them to the peer node; caches the latest telemetry
//! document pushed by the interpreter and serves it back to clients. A 2xx
//! response means the command was accepted and forwarded, never that the
//! aircraft acted on it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crsf_bridge::http::{
    html_response, json_response, post_json, read_request, status_error, status_ok, write_response,
    Request,
};

/// CRSF command gateway: fans operator commands in to the interpreter node
/// and caches its telemetry pushes.
#[derive(Parser)]
#[command(name = "gateway", version, about)]
struct Args {
    /// Listen port
    #[arg(default_value_t = 8081)]
    port: u16,

    /// Interpreter host to forward commands to
    #[arg(default_value = "localhost")]
    peer_host: String,

    /// Interpreter port
    #[arg(default_value_t = 8082)]
    peer_port: u16,

    /// Use short forward timeouts (no-telemetry bench mode)
    #[arg(long)]
    notel: bool,
}

#[derive(Clone)]
struct GatewayState {
    peer_host: String,
    peer_port: u16,
    forward_timeout: Duration,
    last_telemetry: Arc<RwLock<String>>,
}

#[derive(Deserialize)]
struct SetChannelBody {
    channel: usize,
    value: i32,
}

#[derive(Deserialize)]
struct SetChannelsBody {
    channels: Option<Vec<i32>>,
    #[serde(rename = "channelsStr")]
    channels_str: Option<String>,
}

#[derive(Deserialize)]
struct SetModeBody {
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

    let state = GatewayState {
        peer_host: args.peer_host.clone(),
        peer_port: args.peer_port,
        forward_timeout: if args.notel {
            Duration::from_millis(100)
        } else {
            Duration::from_secs(2)
        },
        last_telemetry: Arc::new(RwLock::new("{}".to_string())),
    };

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("binding port {}", args.port))?;

    info!("Gateway listening on port {}", args.port);
    info!("Forwarding commands to {}:{}", args.peer_host, args.peer_port);

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

async fn handle_client(mut stream: TcpStream, state: GatewayState) {
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

async fn route(request: &Request, state: &GatewayState) -> String {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") | ("GET", "/index.html") => html_response(&index_page(state)),
        ("POST", "/api/telemetry") => {
            *state.last_telemetry.write().await = request.body.clone();
            json_response(200, &status_ok("Telemetry received"))
        }
        ("GET", "/api/telemetry") => {
            let telemetry = state.last_telemetry.read().await.clone();
            json_response(200, &telemetry)
        }
        ("POST", path) if path.starts_with("/api/command/") => {
            handle_command(&path["/api/command/".len()..], &request.body, state).await
        }
        _ => json_response(404, &status_error("Not Found")),
    }
}

/// Validate a command body and forward it to the interpreter.
async fn handle_command(command: &str, body: &str, state: &GatewayState) -> String {
    let forward_body = match command {
        "setChannel" => match serde_json::from_str::<SetChannelBody>(body) {
            Ok(cmd) if (1..=16).contains(&cmd.channel) && (1000..=2000).contains(&cmd.value) => {
                serde_json::json!({
                    "command": "setChannel",
                    "channel": cmd.channel,
                    "value": cmd.value,
                })
                .to_string()
            }
            Ok(_) => return json_response(400, &status_error("Invalid channel or value range")),
            Err(_) => return json_response(400, &status_error("Invalid JSON format")),
        },
        "setChannels" => match parse_set_channels(body) {
            Some(channels_str) => serde_json::json!({
                "command": "setChannels",
                "channelsStr": channels_str,
            })
            .to_string(),
            None => return json_response(400, &status_error("Invalid channels array")),
        },
        "sendChannels" => serde_json::json!({ "command": "sendChannels" }).to_string(),
        "setMode" => match serde_json::from_str::<SetModeBody>(body) {
            Ok(cmd) if cmd.mode == "joystick" || cmd.mode == "manual" => {
                serde_json::json!({ "command": "setMode", "mode": cmd.mode }).to_string()
            }
            _ => return json_response(400, &status_error("Invalid mode")),
        },
        _ => return json_response(404, &status_error("Unknown command")),
    };

    let forwarded = post_json(
        &state.peer_host,
        state.peer_port,
        &format!("/api/command/{}", command),
        &forward_body,
        state.forward_timeout,
    )
    .await;

    match forwarded {
        Ok(_) => json_response(200, &status_ok("Command sent to target")),
        Err(e) => {
            warn!("Forward of {} failed: {}", command, e);
            json_response(200, &status_error("Failed to send command to target"))
        }
    }
}

/// Accept either `{"channels":[...]}` or the pre-built
/// `{"channelsStr":"setChannels 1=1500 ..."}` and produce the string form.
/// Array element N maps to channel N+1; out-of-range values are dropped
/// without renumbering the rest.
fn parse_set_channels(body: &str) -> Option<String> {
    let parsed: SetChannelsBody = serde_json::from_str(body).ok()?;

    if let Some(channels_str) = parsed.channels_str {
        if channels_str.starts_with("setChannels ") {
            return Some(channels_str);
        }
        return None;
    }

    let channels = parsed.channels?;
    let mut out = String::from("setChannels");
    let mut any = false;
    for (i, &value) in channels.iter().enumerate().take(16) {
        if (1000..=2000).contains(&value) {
            out.push_str(&format!(" {}={}", i + 1, value));
            any = true;
        }
    }
    any.then_some(out)
}

fn index_page(state: &GatewayState) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><title>CRSF Gateway</title></head>
<body>
<h1>CRSF Gateway</h1>
<p>Forwards operator commands to the interpreter node.</p>
<p>Target node: {}:{}</p>
<p>Available endpoints:</p>
<ul>
<li>POST /api/command/setChannel - set a single channel</li>
<li>POST /api/command/setChannels - set several channels</li>
<li>POST /api/command/sendChannels - force one frame emission</li>
<li>POST /api/command/setMode - joystick or manual steering</li>
<li>POST /api/telemetry - telemetry push from the interpreter</li>
<li>GET /api/telemetry - latest telemetry document</li>
</ul>
</body></html>"#,
        state.peer_host, state.peer_port
    )
}
