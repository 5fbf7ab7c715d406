//! # Command Ingress
//!
//! Text command grammar and the command-file queue.
//!
//! Commands arrive one per line:
//!
//! ```text
//! setChannel <i> <us>          i in 1..16, us in 1000..2000
//! setChannels <i>=<us> ...     any subset, same ranges
//! sendChannels
//! setMode joystick|manual
//! ```
//!
//! Invalid commands and out-of-range values are dropped silently; a command
//! never partially applies garbage. The command file is an append-only queue
//! illusion: the scheduler reads the whole file, applies every line, then
//! deletes it.

use std::path::Path;

use tracing::debug;

/// Steering mode of the send scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Channels 1-4 follow the joystick axes
    Joystick,
    /// Channels are driven solely by commands
    #[default]
    Manual,
}

impl ControlMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "joystick" => Some(ControlMode::Joystick),
            "manual" => Some(ControlMode::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMode::Joystick => "joystick",
            ControlMode::Manual => "manual",
        }
    }
}

/// One parsed control-plane command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetChannel { channel: usize, value: u16 },
    SetChannels(Vec<(usize, u16)>),
    SendChannels,
    SetMode(ControlMode),
}

fn channel_in_range(ch: usize) -> bool {
    (1..=16).contains(&ch)
}

fn value_in_range(us: u16) -> bool {
    (1000..=2000).contains(&us)
}

/// Parse one command line. Returns `None` for anything invalid.
pub fn parse_line(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let keyword = parts.next()?;

    match keyword {
        "setChannel" => {
            let channel: usize = parts.next()?.parse().ok()?;
            let value: u16 = parts.next()?.parse().ok()?;
            if parts.next().is_some() || !channel_in_range(channel) || !value_in_range(value) {
                return None;
            }
            Some(Command::SetChannel { channel, value })
        }
        "setChannels" => {
            // Malformed tokens are skipped like out-of-range ones; the
            // well-formed pairs on the same line still apply
            let mut values = Vec::new();
            for token in parts {
                if let Some((ch, us)) = token.split_once('=') {
                    if let (Ok(channel), Ok(value)) = (ch.parse::<usize>(), us.parse::<u16>()) {
                        if channel_in_range(channel) && value_in_range(value) {
                            values.push((channel, value));
                        }
                    }
                }
            }
            if values.is_empty() {
                return None;
            }
            Some(Command::SetChannels(values))
        }
        "sendChannels" => {
            if parts.next().is_some() {
                return None;
            }
            Some(Command::SendChannels)
        }
        "setMode" => {
            let mode = ControlMode::parse(parts.next()?)?;
            if parts.next().is_some() {
                return None;
            }
            Some(Command::SetMode(mode))
        }
        _ => None,
    }
}

/// Parse a multi-line command script, skipping invalid lines.
pub fn parse_script(script: &str) -> Vec<Command> {
    script.lines().filter_map(parse_line).collect()
}

/// Drain the command file: read every line, delete the file, return the
/// parsed commands. A missing file is the common idle case; read or delete
/// failures are logged and retried on the next poll.
pub async fn drain_file(path: &Path) -> Vec<Command> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            debug!("Cannot read command file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Cannot remove command file {}: {}", path.display(), e);
    }

    parse_script(&contents)
}

/// Append one command line to the command file (the ingress side).
pub async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    Ok(())
}
