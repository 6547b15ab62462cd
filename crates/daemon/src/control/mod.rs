// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal Tor control-port client.
//!
//! Speaks just enough of the control protocol for the measurement:
//! authentication, GETINFO, SETEVENTS, SIGNAL, DROPGUARDS/DROPTIMEOUTS,
//! and ephemeral onion service management. Replies are `<code><sep>text`
//! lines where a space separator ends the reply and `+` opens a data
//! block; asynchronous events arrive as code-650 lines at any time.

pub mod monitor;

pub use monitor::{MonitorSchedule, TorCtlMonitor};

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication refused: {0}")]
    AuthFailed(String),
    #[error("control connection closed")]
    Closed,
    #[error("command {command} failed: {code} {message}")]
    CommandFailed { command: String, code: u16, message: String },
    #[error("malformed reply line: {0}")]
    MalformedReply(String),
    #[error("timed out waiting for onion service publication")]
    PublicationTimeout,
}

/// One complete (possibly multi-line) command reply.
#[derive(Debug)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.code == 250 || self.code == 251
    }

    /// The value of a `key=value` reply line, if present.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}=");
        self.lines
            .iter()
            .find_map(|line| line.strip_prefix(&prefix))
    }
}

/// An authenticated control-port session.
#[derive(Debug)]
pub struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlConnection {
    /// Connect to the local daemon's control port and authenticate.
    pub async fn connect(port: u16) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        conn.authenticate().await?;
        Ok(conn)
    }

    async fn authenticate(&mut self) -> Result<(), ControlError> {
        let reply = self.command("AUTHENTICATE").await?;
        if !reply.is_ok() {
            return Err(ControlError::AuthFailed(reply.lines.join(" ")));
        }
        Ok(())
    }

    /// Send a command and read its reply, skipping any asynchronous
    /// events that arrive in between.
    pub async fn command(&mut self, command: &str) -> Result<Reply, ControlError> {
        self.send(command).await?;
        loop {
            let reply = self.read_reply().await?;
            if reply.code != 650 {
                return Ok(reply);
            }
            debug!(event = ?reply.lines, "event interleaved with reply, dropping");
        }
    }

    /// Like [`Self::command`], but a non-250 reply becomes an error.
    pub async fn command_ok(&mut self, command: &str) -> Result<Reply, ControlError> {
        let reply = self.command(command).await?;
        if !reply.is_ok() {
            return Err(ControlError::CommandFailed {
                command: command.split_whitespace().next().unwrap_or("").to_string(),
                code: reply.code,
                message: reply.lines.join(" "),
            });
        }
        Ok(reply)
    }

    pub async fn get_info(&mut self, key: &str) -> Result<String, ControlError> {
        let reply = self.command_ok(&format!("GETINFO {key}")).await?;
        Ok(reply
            .value_of(key)
            .map(str::to_string)
            .unwrap_or_else(|| reply.lines.join(" ")))
    }

    /// The event kinds this daemon advertises.
    pub async fn supported_events(&mut self) -> Result<Vec<String>, ControlError> {
        let names = self.get_info("events/names").await?;
        Ok(names.split_whitespace().map(str::to_string).collect())
    }

    pub async fn set_events(&mut self, events: &[String]) -> Result<(), ControlError> {
        let command = format!("SETEVENTS {}", events.join(" "));
        self.command_ok(command.trim_end()).await?;
        Ok(())
    }

    pub async fn signal(&mut self, signal: &str) -> Result<(), ControlError> {
        self.command_ok(&format!("SIGNAL {signal}")).await?;
        Ok(())
    }

    pub async fn drop_guards(&mut self) -> Result<(), ControlError> {
        self.command_ok("DROPGUARDS").await?;
        Ok(())
    }

    /// Create a detached ephemeral onion service.
    ///
    /// `key` is either `NEW:ED25519-V3` or a persisted
    /// `<key_type>:<key_content>` blob, handled opaquely. Returns
    /// `(service_id, private_key)`; the private key is only present when
    /// the daemon generated a new one.
    pub async fn add_onion(
        &mut self,
        key: &str,
        port_mapping: &[(u16, u16)],
    ) -> Result<(String, Option<String>), ControlError> {
        let ports: Vec<String> = port_mapping
            .iter()
            .map(|(virt, target)| format!("Port={virt},127.0.0.1:{target}"))
            .collect();
        let command = format!("ADD_ONION {key} Flags=Detach {}", ports.join(" "));
        let reply = self.command_ok(&command).await?;

        let service_id = reply
            .value_of("ServiceID")
            .ok_or_else(|| ControlError::MalformedReply(reply.lines.join(" ")))?
            .to_string();
        let private_key = reply.value_of("PrivateKey").map(str::to_string);
        Ok((service_id, private_key))
    }

    pub async fn del_onion(&mut self, service_id: &str) -> Result<(), ControlError> {
        self.command_ok(&format!("DEL_ONION {service_id}")).await?;
        Ok(())
    }

    /// Wait until an HS_DESC UPLOADED event for `service_id` arrives.
    /// Callers subscribe with `SETEVENTS HS_DESC` first.
    pub async fn await_publication(
        &mut self,
        service_id: &str,
        timeout: Duration,
    ) -> Result<(), ControlError> {
        let wait = async {
            loop {
                let line = self.read_line().await?;
                if line.contains("HS_DESC")
                    && line.contains("UPLOADED")
                    && line.contains(service_id)
                {
                    return Ok(());
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::PublicationTimeout),
        }
    }

    /// Split into a buffered reader half (for an event pump) and the
    /// writer half (for fire-and-forget commands).
    pub fn into_split(self) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        (self.reader, self.writer)
    }

    /// Read one raw protocol line (async events included).
    pub async fn read_line(&mut self) -> Result<String, ControlError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ControlError::Closed);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    async fn send(&mut self, command: &str) -> Result<(), ControlError> {
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply, ControlError> {
        let mut lines = Vec::new();
        let mut code = 0u16;
        loop {
            let line = self.read_line().await?;
            if line.len() < 4 || !line.is_char_boundary(4) {
                return Err(ControlError::MalformedReply(line));
            }
            let (head, rest) = line.split_at(4);
            let parsed: u16 = head[..3]
                .parse()
                .map_err(|_| ControlError::MalformedReply(line.clone()))?;
            code = parsed;
            let sep = head.as_bytes()[3];
            match sep {
                b'+' => {
                    // data block: collect until the terminating dot
                    let mut block = vec![rest.to_string()];
                    loop {
                        let data = self.read_line().await?;
                        if data == "." {
                            break;
                        }
                        block.push(data);
                    }
                    lines.push(block.join("\n"));
                }
                b'-' => lines.push(rest.to_string()),
                b' ' => {
                    lines.push(rest.to_string());
                    break;
                }
                _ => return Err(ControlError::MalformedReply(line)),
            }
        }
        Ok(Reply { code, lines })
    }
}

/// The event kinds the monitor tries to subscribe to. Log-level events
/// are deliberately absent; the tor daemon's own stdout already carries
/// them.
pub const MONITOR_EVENTS: &[&str] = &[
    "ADDRMAP",
    "BUILDTIMEOUT_SET",
    "BW",
    "CELL_STATS",
    "CIRC",
    "CIRC_BW",
    "CIRC_MINOR",
    "CLIENTS_SEEN",
    "CONF_CHANGED",
    "CONN_BW",
    "DESCCHANGED",
    "GUARD",
    "HS_DESC",
    "HS_DESC_CONTENT",
    "NETWORK_LIVENESS",
    "NEWCONSENSUS",
    "NEWDESC",
    "NS",
    "ORCONN",
    "SIGNAL",
    "STATUS_CLIENT",
    "STATUS_GENERAL",
    "STATUS_SERVER",
    "STREAM",
    "STREAM_BW",
    "TB_EMPTY",
    "TRANSPORT_LAUNCHED",
];

/// Intersect the protocol-defined set with what the daemon advertises.
/// Unknown events are logged and skipped, never fatal.
pub fn select_events(advertised: &[String]) -> Vec<String> {
    let mut selected = Vec::new();
    for event in MONITOR_EVENTS {
        if advertised.iter().any(|a| a == event) {
            selected.push((*event).to_string());
        } else {
            warn!(event = *event, "event not supported by this tor, skipping");
        }
    }
    selected
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
