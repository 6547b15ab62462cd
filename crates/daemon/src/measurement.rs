// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: bootstraps every component of a measurement in order,
//! keeps a heartbeat on their tasks, and tears everything down cleanly.
//!
//! Bootstrap order: tgen server, tor server (with monitor and the
//! ephemeral onion service), tor client (with monitor), tgen client,
//! rotator. Shutdown is one shared cancellation token; SIGINT and fatal
//! watchdog errors both end up cancelling it.

use crate::control::{ControlConnection, MonitorSchedule, TorCtlMonitor};
use crate::rotator::Rotator;
use crate::sink::LineSink;
use crate::tgen::{listen_model, torperf_model, TGenModelConf};
use crate::torrc::{create_tor_config, TorConfigInputs, TorRole};
use crate::watchdog::{RestartPolicy, Watchdog};
use fs2::FileExt;
use operf_core::SystemClock;
use regex::Regex;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Minimum tor version for ephemeral onion services and the
/// cache-clearing NEWNYM.
const MIN_TOR_VERSION: (u32, u32, u32, u32) = (0, 2, 7, 3);

/// Name of the persisted onion service key under the private directory.
const ONION_KEY_FILE: &str = "os_key_v3";

#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("another measurement holds the datadir lock")]
    DatadirLocked,
    #[error("tor version {found} is too old, need at least 0.2.7.3-rc")]
    TorVersionTooOld { found: String },
    #[error("could not determine tor version from `{output}`")]
    TorVersionUnknown { output: String },
    #[error("tor did not reach Bootstrapped 100 within {0:?}")]
    BootstrapTimeout(Duration),
    #[error("control error: {0}")]
    Control(#[from] crate::control::ControlError),
    #[error("neither onion nor inet measurement mode is enabled")]
    NoMeasurementMode,
}

/// Ports for one tgen endpoint and the tor daemon that serves it.
#[derive(Debug, Clone)]
pub struct TGenEndpointConf {
    pub listen_port: u16,
    /// Address clients connect to; `None` means discover the public one.
    pub connect_ip: Option<String>,
    pub connect_port: u16,
    pub tor_ctl_port: u16,
    pub tor_socks_port: u16,
}

/// Everything a measurement run needs to know.
#[derive(Debug, Clone)]
pub struct MeasurementConfig {
    pub tor_bin: PathBuf,
    pub tgen_bin: PathBuf,
    pub datadir: PathBuf,
    pub privatedir: PathBuf,
    pub nickname: Option<String>,
    pub do_onion: bool,
    pub do_inet: bool,
    pub tor_inputs: TorConfigInputs,
    pub traffic_model: TGenModelConf,
    pub client: TGenEndpointConf,
    pub server: TGenEndpointConf,
    pub restart_policy: RestartPolicy,
    pub newnym_interval_seconds: u64,
    pub bootstrap_timeout: Duration,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            tor_bin: PathBuf::from("tor"),
            tgen_bin: PathBuf::from("tgen"),
            datadir: PathBuf::from("operf-data"),
            privatedir: PathBuf::from("operf-private"),
            nickname: None,
            do_onion: true,
            do_inet: true,
            tor_inputs: TorConfigInputs::default(),
            traffic_model: TGenModelConf::default(),
            client: TGenEndpointConf {
                listen_port: 58888,
                connect_ip: None,
                connect_port: 8080,
                tor_ctl_port: 59050,
                tor_socks_port: 59000,
            },
            server: TGenEndpointConf {
                listen_port: 8080,
                connect_ip: None,
                connect_port: 8080,
                tor_ctl_port: 59051,
                tor_socks_port: 59001,
            },
            restart_policy: RestartPolicy::default(),
            newnym_interval_seconds: 300,
            bootstrap_timeout: Duration::from_secs(300),
        }
    }
}

/// A running measurement.
pub struct Measurement {
    config: MeasurementConfig,
    shutdown: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    tgen_client_task: Option<JoinHandle<()>>,
    hs_service_id: Option<String>,
    hs_control_port: Option<u16>,
    // NOTE(lifetime): held to keep the exclusive datadir lock; released on drop
    #[allow(dead_code)]
    lock_file: Option<File>,
}

impl Measurement {
    pub fn new(config: MeasurementConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            tgen_client_task: None,
            hs_service_id: None,
            hs_control_port: None,
            lock_file: None,
        }
    }

    /// The shared shutdown token; cancel it to stop the measurement.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bootstrap everything, run until done, tear down. Blocks for the
    /// lifetime of the measurement.
    pub async fn run(&mut self) -> Result<(), MeasurementError> {
        if !self.config.do_onion && !self.config.do_inet {
            return Err(MeasurementError::NoMeasurementMode);
        }

        operf_core::make_dir_path(&self.config.datadir)?;
        operf_core::make_dir_path(&self.config.privatedir)?;
        self.lock_datadir()?;

        if self.config.do_onion {
            self.check_tor_version().await?;
        }

        info!(datadir = %self.config.datadir.display(), "bootstrapping measurement");
        let result = self.bootstrap_and_wait().await;

        self.teardown().await;
        result
    }

    async fn bootstrap_and_wait(&mut self) -> Result<(), MeasurementError> {
        let docroot = self.config.datadir.join("htdocs");
        let mut rotator = Rotator::new(
            docroot,
            self.config.nickname.clone(),
            SystemClock,
        );

        // tgen server first: it must be listening before tor maps the
        // onion service onto it
        let server_sink = self.start_tgen_server()?;
        rotator.watch(server_sink);

        if self.config.do_onion {
            let socks_port = if self.config.tor_inputs.single_onion {
                // a single onion service must not have an open socks port
                0
            } else {
                self.config.server.tor_socks_port
            };
            let mapping = vec![(self.config.client.connect_port, self.config.server.listen_port)];
            let (tor_sink, torctl_sink) = self
                .start_tor(TorRole::Server, self.config.server.tor_ctl_port, socks_port, Some(mapping))
                .await?;
            rotator.watch(tor_sink);
            rotator.watch(torctl_sink);
        }

        let (client_tor_sink, client_torctl_sink) = self
            .start_tor(
                TorRole::Client,
                self.config.client.tor_ctl_port,
                self.config.client.tor_socks_port,
                None,
            )
            .await?;
        rotator.watch(client_tor_sink);
        rotator.watch_torctl(client_torctl_sink);

        let mut server_urls = Vec::new();
        if self.config.do_onion {
            if let Some(service_id) = &self.hs_service_id {
                server_urls.push(format!("{service_id}.onion:{}", self.config.client.connect_port));
            }
        }
        if self.config.do_inet {
            let connect_ip = match &self.config.client.connect_ip {
                Some(ip) if ip != "0.0.0.0" => ip.clone(),
                _ => operf_core::local_ip_address().unwrap_or_else(|| "127.0.0.1".to_string()),
            };
            server_urls.push(format!("{connect_ip}:{}", self.config.client.connect_port));
        }
        info!(?server_urls, "tgen client targets");

        let client_sink = self.start_tgen_client(server_urls)?;
        rotator.watch_tgen(client_sink);

        let shutdown = self.shutdown.clone();
        self.tasks.push((
            "logrotate".to_string(),
            tokio::spawn(rotator.run(shutdown)),
        ));

        info!("bootstrapping finished, entering heartbeat loop");
        self.heartbeat_loop().await;
        Ok(())
    }

    /// Hourly liveness logging; exits on SIGINT, shutdown, a dead task,
    /// or (in one-shot mode) the tgen client finishing.
    async fn heartbeat_loop(&mut self) {
        let one_shot = self.config.traffic_model.num_transfers > 0;
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        tick.tick().await; // the first tick is immediate

        if one_shot {
            let Some(mut client) = self.tgen_client_task.take() else {
                return;
            };
            let finished = tokio::select! {
                _ = &mut client => true,
                _ = self.shutdown.cancelled() => false,
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("interrupt received, shutting down gracefully");
                    }
                    false
                }
            };
            if finished {
                info!("tgen client finished, shutting down");
            } else {
                self.tgen_client_task = Some(client);
            }
            return;
        }

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !self.log_liveness() {
                        warn!("some components have died, giving up and exiting");
                        return;
                    }
                    info!("next heartbeat in 1 hour, press CTRL-C for graceful shutdown");
                }
                _ = self.shutdown.cancelled() => return,
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("interrupt received, shutting down gracefully");
                    }
                    return;
                }
            }
        }
    }

    /// Log each managed task's liveness; false if any died.
    fn log_liveness(&self) -> bool {
        let mut all_alive = true;
        for (name, handle) in &self.tasks {
            if handle.is_finished() {
                warn!(task = %name, "task is dead");
                all_alive = false;
            } else {
                info!(task = %name, "task is alive");
            }
        }
        all_alive
    }

    async fn teardown(&mut self) {
        info!("cleaning up child processes");

        if let (Some(service_id), Some(port)) = (&self.hs_service_id, self.hs_control_port) {
            // best effort: tor may already be gone
            match ControlConnection::connect(port).await {
                Ok(mut conn) => {
                    if let Err(e) = conn.del_onion(service_id).await {
                        warn!(error = %e, "removing onion service failed");
                    }
                }
                Err(e) => warn!(error = %e, "control reconnect for cleanup failed"),
            }
        }

        self.shutdown.cancel();
        for (name, handle) in self.tasks.drain(..) {
            info!(task = %name, "joining task");
            let _ = handle.await;
        }
        if let Some(handle) = self.tgen_client_task.take() {
            let _ = handle.await;
        }
        info!("child process cleanup complete");
    }

    fn lock_datadir(&mut self) -> Result<(), MeasurementError> {
        let lock_path = self.config.datadir.join("operfd.lock");
        let file = File::create(&lock_path)?;
        file.try_lock_exclusive()
            .map_err(|_| MeasurementError::DatadirLocked)?;
        self.lock_file = Some(file);
        Ok(())
    }

    async fn check_tor_version(&self) -> Result<(), MeasurementError> {
        let output = tokio::process::Command::new(&self.config.tor_bin)
            .arg("--version")
            .output()
            .await?;
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        let Some(version) = parse_tor_version(&text) else {
            return Err(MeasurementError::TorVersionUnknown { output: text });
        };
        if version < MIN_TOR_VERSION {
            return Err(MeasurementError::TorVersionTooOld {
                found: format!(
                    "{}.{}.{}.{}",
                    version.0, version.1, version.2, version.3
                ),
            });
        }
        Ok(())
    }

    fn start_tgen_server(&mut self) -> Result<LineSink, MeasurementError> {
        let dir = self.config.datadir.join("tgen-server");
        operf_core::make_dir_path(&dir)?;
        let conf_path = dir.join("tgen.graphml.xml");
        listen_model(self.config.server.listen_port).write_to_file(&conf_path)?;
        info!(port = self.config.server.listen_port, "starting tgen server");

        let sink = LineSink::file(dir.join("onionperf.tgen.log"))?;
        let watchdog = Watchdog::new(
            vec![
                self.config.tgen_bin.display().to_string(),
                conf_path.display().to_string(),
            ],
            &dir,
            sink.clone(),
        )
        .with_policy(self.config.restart_policy.clone());
        self.spawn_watchdog("tgen_server_watchdog", watchdog, None);
        Ok(sink)
    }

    fn start_tgen_client(&mut self, server_urls: Vec<String>) -> Result<LineSink, MeasurementError> {
        let dir = self.config.datadir.join("tgen-client");
        operf_core::make_dir_path(&dir)?;
        let conf_path = dir.join("tgen.graphml.xml");

        let mut model_conf = self.config.traffic_model.clone();
        model_conf.servers = server_urls;
        torperf_model(
            self.config.client.listen_port,
            Some(self.config.client.tor_socks_port),
            &model_conf,
        )
        .write_to_file(&conf_path)?;
        info!(port = self.config.client.listen_port, "starting tgen client");

        let sink = LineSink::file(dir.join("onionperf.tgen.log"))?;
        let mut watchdog = Watchdog::new(
            vec![
                self.config.tgen_bin.display().to_string(),
                conf_path.display().to_string(),
            ],
            &dir,
            sink.clone(),
        )
        .with_policy(self.config.restart_policy.clone());
        // one-shot clients finish on their own; don't restart them
        if model_conf.num_transfers > 0 {
            watchdog = watchdog.no_relaunch();
        }

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = watchdog.run(shutdown.clone(), None).await {
                error!(task = "tgen_client_watchdog", error = %e, "watchdog gave up");
                shutdown.cancel();
            }
        });
        self.tgen_client_task = Some(handle);
        Ok(sink)
    }

    async fn start_tor(
        &mut self,
        role: TorRole,
        control_port: u16,
        socks_port: u16,
        hs_port_mapping: Option<Vec<(u16, u16)>>,
    ) -> Result<(LineSink, LineSink), MeasurementError> {
        let name = match role {
            TorRole::Client => "client",
            TorRole::Server => "server",
        };
        info!(name, control_port, socks_port, "starting tor process");
        let dir = self.config.datadir.join(format!("tor-{name}"));
        operf_core::make_dir_path(&dir)?;

        let torrc = create_tor_config(role, control_port, socks_port, &dir, &self.config.tor_inputs)?;
        std::fs::write(dir.join("torrc"), &torrc)?;

        let tor_sink = LineSink::file(dir.join("onionperf.tor.log"))?;
        #[allow(clippy::unwrap_used)] // pattern is a literal
        let ready_pattern = Regex::new("Bootstrapped 100").unwrap();
        let watchdog = Watchdog::new(
            vec![
                self.config.tor_bin.display().to_string(),
                "-f".to_string(),
                "-".to_string(),
            ],
            &dir,
            tor_sink.clone(),
        )
        .with_stdin(torrc.into_bytes())
        .with_ready_pattern(ready_pattern)
        .with_policy(self.config.restart_policy.clone());

        let (ready_tx, mut ready_rx) = watch::channel(false);
        self.spawn_watchdog(&format!("tor_{name}_watchdog"), watchdog, Some(ready_tx));

        // wait for bootstrap, then give tor a moment to open the control port
        let bootstrap = ready_rx.wait_for(|ready| *ready);
        match tokio::time::timeout(self.config.bootstrap_timeout, bootstrap).await {
            Ok(Ok(_)) => {}
            _ => return Err(MeasurementError::BootstrapTimeout(self.config.bootstrap_timeout)),
        }
        tokio::time::sleep(Duration::from_secs(3)).await;

        let torctl_sink = LineSink::file(dir.join("onionperf.torctl.log"))?;
        let schedule = MonitorSchedule {
            newnym_interval_seconds: self.config.newnym_interval_seconds,
            drop_guards_interval_hours: self.config.tor_inputs.drop_guards_interval_hours,
        };
        let monitor = TorCtlMonitor::new(control_port, torctl_sink.clone(), schedule, &dir);
        let shutdown = self.shutdown.clone();
        self.tasks.push((
            format!("torctl_{name}_helper"),
            tokio::spawn(async move {
                let _ = monitor.run(shutdown).await;
            }),
        ));

        if let Some(mapping) = hs_port_mapping {
            self.start_onion_service(control_port, &mapping).await?;
        }

        Ok((tor_sink, torctl_sink))
    }

    /// Create (or restore) the detached ephemeral onion service. The key
    /// is persisted as an opaque `<key_type>:<key_content>` blob.
    async fn start_onion_service(
        &mut self,
        control_port: u16,
        mapping: &[(u16, u16)],
    ) -> Result<(), MeasurementError> {
        info!("creating ephemeral onion service");
        let key_path = self.config.privatedir.join(ONION_KEY_FILE);
        let mut conn = ControlConnection::connect(control_port).await?;
        conn.set_events(&["HS_DESC".to_string()]).await?;

        let (service_id, new_key) = if key_path.exists() {
            let key = std::fs::read_to_string(&key_path)?;
            conn.add_onion(key.trim_end(), mapping).await?
        } else {
            conn.add_onion("NEW:ED25519-V3", mapping).await?
        };
        if let Some(key) = new_key {
            std::fs::write(&key_path, key)?;
        }

        if let Err(e) = conn
            .await_publication(&service_id, Duration::from_secs(180))
            .await
        {
            warn!(error = %e, "onion service descriptor upload not yet confirmed");
        }

        info!(service_id = %service_id, "ephemeral onion service is available");
        self.hs_service_id = Some(service_id);
        self.hs_control_port = Some(control_port);
        Ok(())
    }

    fn spawn_watchdog(
        &mut self,
        name: &str,
        watchdog: Watchdog,
        ready: Option<watch::Sender<bool>>,
    ) {
        let shutdown = self.shutdown.clone();
        let task_name = name.to_string();
        let log_name = task_name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = watchdog.run(shutdown.clone(), ready).await {
                error!(task = %log_name, error = %e, "watchdog gave up");
                shutdown.cancel();
            }
        });
        self.tasks.push((task_name, handle));
    }
}

/// Pull `(major, minor, micro, patch)` out of `tor --version` output.
fn parse_tor_version(output: &str) -> Option<(u32, u32, u32, u32)> {
    let rest = output.split("Tor version ").nth(1)?;
    let token = rest.split_whitespace().next()?;
    let numeric = token.split('-').next()?.trim_end_matches('.');
    let mut parts = numeric.split('.').map(|p| p.parse::<u32>());
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let micro = parts.next().and_then(Result::ok).unwrap_or(0);
    let patch = parts.next().and_then(Result::ok).unwrap_or(0);
    Some((major, minor, micro, patch))
}

#[cfg(test)]
#[path = "measurement_tests.rs"]
mod tests;
