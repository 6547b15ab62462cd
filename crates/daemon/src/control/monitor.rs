// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-port monitor: subscribes to the daemon's asynchronous events,
//! serializes them into a log sink, and drives the periodic circuit
//! hygiene signals (NEWNYM, guard dropping).

use super::{select_events, ControlConnection, ControlError};
use crate::sink::LineSink;
use chrono::Local;
use operf_core::{Clock, SystemClock};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodic control-plane actions, tick-counter indexed. A zero interval
/// disables the action.
#[derive(Debug, Clone)]
pub struct MonitorSchedule {
    pub newnym_interval_seconds: u64,
    pub drop_guards_interval_hours: u64,
}

impl Default for MonitorSchedule {
    fn default() -> Self {
        Self { newnym_interval_seconds: 300, drop_guards_interval_hours: 0 }
    }
}

/// Monitors one tor daemon's control port.
pub struct TorCtlMonitor {
    port: u16,
    sink: LineSink,
    schedule: MonitorSchedule,
    /// The daemon's data directory, for guard-drop state snapshots.
    tor_datadir: PathBuf,
}

impl TorCtlMonitor {
    pub fn new(
        port: u16,
        sink: LineSink,
        schedule: MonitorSchedule,
        tor_datadir: impl Into<PathBuf>,
    ) -> Self {
        Self { port, sink, schedule, tor_datadir: tor_datadir.into() }
    }

    /// Connect, subscribe, and run until shutdown. The sink is closed on
    /// the way out.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControlError> {
        let result = self.run_inner(&shutdown).await;
        if let Err(e) = &result {
            warn!(port = self.port, error = %e, "control monitor stopped");
        }
        self.sink.close();
        result
    }

    async fn run_inner(&self, shutdown: &CancellationToken) -> Result<(), ControlError> {
        let mut conn = ControlConnection::connect(self.port).await?;

        let version = conn.get_info("version").await?;
        let status = conn.get_info("status/version/current").await?;
        let host = operf_core::local_hostname().unwrap_or_else(|| "unknown".to_string());
        self.log(&format!(
            "Starting torctl program on host {host} using Tor version {version} status={status}"
        ));

        let boot_phase = conn.get_info("status/bootstrap-phase").await?;
        self.log(&boot_phase);

        let advertised = conn.supported_events().await?;
        let events = select_events(&advertised);
        conn.set_events(&events).await?;
        info!(port = self.port, count = events.len(), "subscribed to control events");

        // From here on, events and command replies share the socket. The
        // reader half pumps events straight into the sink; replies come
        // back over a channel so the periodic actions can check them.
        let (reader, mut writer) = conn.into_split();
        let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);
        let pump = tokio::spawn(pump_events(reader, self.sink.clone(), reply_tx));

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut interval_count: u64 = 0;
        let mut next_newnym = self.schedule.newnym_interval_seconds;
        let mut next_drop_guards: u64 = 0;

        loop {
            if self.schedule.drop_guards_interval_hours > 0
                && interval_count >= next_drop_guards
            {
                next_drop_guards += self.schedule.drop_guards_interval_hours * 3600;
                self.drop_guards(&mut writer, &mut reply_rx).await;
            }

            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            interval_count += 1;

            if self.schedule.newnym_interval_seconds > 0 && interval_count >= next_newnym {
                next_newnym += self.schedule.newnym_interval_seconds;
                send_command(&mut writer, "SIGNAL NEWNYM").await;
                if !reply_is_ok(&mut reply_rx).await {
                    warn!(port = self.port, "NEWNYM signal was not accepted");
                }
            }
        }

        pump.abort();
        let _ = pump.await;
        Ok(())
    }

    /// Drop the guard set, best-effort drop circuit build timeouts, and
    /// snapshot the daemon's state file.
    async fn drop_guards(
        &self,
        writer: &mut OwnedWriteHalf,
        replies: &mut mpsc::Receiver<String>,
    ) {
        send_command(writer, "DROPGUARDS").await;
        if !reply_is_ok(replies).await {
            warn!(port = self.port, "DROPGUARDS was not accepted");
        }

        send_command(writer, "DROPTIMEOUTS").await;
        if !reply_is_ok(replies).await {
            self.log("[WARNING] unrecognized command DROPTIMEOUTS in tor");
        }

        self.log("Dropping guards");
        let history = self.tor_datadir.join("state_history");
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let snapshot = history.join(format!("state_{stamp}"));
        if let Err(e) = operf_core::make_dir_path(&history)
            .and_then(|()| std::fs::copy(self.tor_datadir.join("state"), &snapshot).map(|_| ()))
        {
            warn!(error = %e, "state file snapshot failed");
        }
    }

    /// `<local time> <unix ts> <message>`, the framing the parsers key on.
    fn log(&self, message: &str) {
        let clock = SystemClock;
        self.sink.write_line(&format!(
            "{} {:.2} {message}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            clock.unix_ts(),
        ));
    }
}

/// Copy asynchronous events into the sink; pass command replies back.
async fn pump_events(
    reader: BufReader<OwnedReadHalf>,
    sink: LineSink,
    replies: mpsc::Sender<String>,
) {
    let clock = SystemClock;
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.starts_with("650") {
                    sink.write_line(&format!(
                        "{} {:.2} {line}",
                        Local::now().format("%Y-%m-%d %H:%M:%S"),
                        clock.unix_ts(),
                    ));
                } else if replies.try_send(line).is_err() {
                    debug!("reply channel full, dropping reply line");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "control event stream closed");
                break;
            }
        }
    }
}

async fn send_command(writer: &mut OwnedWriteHalf, command: &str) {
    if let Err(e) = writer.write_all(format!("{command}\r\n").as_bytes()).await {
        warn!(command, error = %e, "sending control command failed");
    }
}

/// Wait briefly for the next reply line and check its code.
async fn reply_is_ok(replies: &mut mpsc::Receiver<String>) -> bool {
    match tokio::time::timeout(Duration::from_secs(2), replies.recv()).await {
        Ok(Some(line)) => line.starts_with("25"),
        _ => false,
    }
}
