// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process supervision.
//!
//! A watchdog owns one long-lived child: it streams the child's output
//! into a [`LineSink`], optionally scans for a readiness line before
//! declaring the child up, and respawns it after unexpected deaths. Too
//! many deaths inside the trailing window trip the breaker and the error
//! propagates to the supervisor.

use crate::sink::LineSink;
use regex::Regex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Restart thresholds. These are policy, not mechanism: deployments tune
/// them through configuration.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Pause before respawning after an unexpected death.
    pub pause: Duration,
    /// Only deaths younger than this count against the breaker.
    pub window: Duration,
    /// More than this many deaths inside the window is fatal.
    pub max_failures: usize,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            pause: Duration::from_secs(30),
            window: Duration::from_secs(3600),
            max_failures: 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("command exited unexpectedly {count} times within {window:?}, giving up")]
    TooManyFailures { count: usize, window: Duration },
}

/// Signals readiness (at most once per spawn) to whoever holds the
/// receiving half.
pub type ReadySender = watch::Sender<bool>;

enum ChildOutcome {
    /// The shared shutdown signal fired; the child was terminated.
    Shutdown,
    /// A `no_relaunch` child finished on its own.
    FinishedExpected,
    /// The child died (or failed to spawn) while it was still wanted.
    Died,
}

/// Supervises one child command.
pub struct Watchdog {
    command: Vec<String>,
    cwd: PathBuf,
    sink: LineSink,
    stdin_bytes: Option<Vec<u8>>,
    ready_pattern: Option<Regex>,
    no_relaunch: bool,
    policy: RestartPolicy,
}

impl Watchdog {
    pub fn new(command: Vec<String>, cwd: impl Into<PathBuf>, sink: LineSink) -> Self {
        Self {
            command,
            cwd: cwd.into(),
            sink,
            stdin_bytes: None,
            ready_pattern: None,
            no_relaunch: false,
            policy: RestartPolicy::default(),
        }
    }

    /// Bytes written once to the child's stdin, which is then closed.
    pub fn with_stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin_bytes = Some(bytes);
        self
    }

    /// The child only counts as up once a line matches this pattern.
    pub fn with_ready_pattern(mut self, pattern: Regex) -> Self {
        self.ready_pattern = Some(pattern);
        self
    }

    /// A child that is expected to finish on its own; its exit triggers
    /// shutdown instead of a respawn.
    pub fn no_relaunch(mut self) -> Self {
        self.no_relaunch = true;
        self
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Supervise until shutdown or until the breaker trips. The sink is
    /// closed on the way out either way.
    pub async fn run(
        self,
        shutdown: CancellationToken,
        ready: Option<ReadySender>,
    ) -> Result<(), WatchdogError> {
        let mut failures: VecDeque<Instant> = VecDeque::new();
        let mut pause = Duration::ZERO;

        while !shutdown.is_cancelled() {
            if !pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.cancelled() => break,
                }
            }

            match self.run_child(&shutdown, ready.as_ref()).await {
                ChildOutcome::Shutdown => break,
                ChildOutcome::FinishedExpected => {
                    info!(command = ?self.command, "command finished on its own");
                    shutdown.cancel();
                    break;
                }
                ChildOutcome::Died => {
                    warn!(command = ?self.command, "command finished before expected");
                    let now = Instant::now();
                    while failures
                        .front()
                        .is_some_and(|at| now.duration_since(*at) > self.policy.window)
                    {
                        failures.pop_front();
                    }
                    failures.push_back(now);
                    if failures.len() > self.policy.max_failures {
                        self.sink.close();
                        return Err(WatchdogError::TooManyFailures {
                            count: failures.len(),
                            window: self.policy.window,
                        });
                    }
                    pause = self.policy.pause;
                }
            }
        }

        self.sink.close();
        Ok(())
    }

    async fn run_child(
        &self,
        shutdown: &CancellationToken,
        ready: Option<&ReadySender>,
    ) -> ChildOutcome {
        let Some(program) = self.command.first() else {
            warn!("watchdog configured with an empty command");
            return ChildOutcome::Died;
        };

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..])
            .current_dir(&self.cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin_bytes.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = ?self.command, error = %e, "failed to spawn command");
                return ChildOutcome::Died;
            }
        };

        if let Some(bytes) = &self.stdin_bytes {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(bytes).await {
                    warn!(error = %e, "writing child stdin failed");
                }
                // dropping stdin closes it
            }
        }

        let stderr_pump = child.stderr.take().map(|stderr| {
            let sink = self.sink.clone();
            tokio::spawn(pump_stderr(stderr, sink))
        });

        let mut lines = match child.stdout.take() {
            Some(stdout) => BufReader::new(stdout).lines(),
            None => {
                warn!("child has no stdout handle");
                self.terminate(&mut child).await;
                return ChildOutcome::Died;
            }
        };

        // Readiness scan: stream lines into the sink until one matches.
        // EOF here means the child died before it became ready.
        if let Some(pattern) = &self.ready_pattern {
            let mut seen = false;
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            self.sink.write_line(&line);
                            if pattern.is_match(&line) {
                                seen = true;
                                break;
                            }
                        }
                        _ => break,
                    },
                    _ = shutdown.cancelled() => {
                        self.terminate(&mut child).await;
                        join_pump(stderr_pump).await;
                        return ChildOutcome::Shutdown;
                    }
                }
            }
            if !seen {
                let _ = child.wait().await;
                join_pump(stderr_pump).await;
                return ChildOutcome::Died;
            }
        }

        if let Some(ready) = ready {
            let _ = ready.send(true);
        }

        // Pump output until EOF or shutdown.
        let outcome = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.sink.write_line(&line),
                    _ => break self.reap(&mut child, shutdown).await,
                },
                _ = shutdown.cancelled() => {
                    self.terminate(&mut child).await;
                    // drain whatever is still buffered
                    while let Ok(Some(line)) = lines.next_line().await {
                        self.sink.write_line(&line);
                    }
                    break ChildOutcome::Shutdown;
                }
            }
        };

        join_pump(stderr_pump).await;
        outcome
    }

    /// stdout hit EOF: collect the exit status and classify.
    async fn reap(&self, child: &mut Child, shutdown: &CancellationToken) -> ChildOutcome {
        tokio::select! {
            _ = child.wait() => {}
            _ = shutdown.cancelled() => {
                self.terminate(child).await;
                return ChildOutcome::Shutdown;
            }
        }
        if shutdown.is_cancelled() {
            ChildOutcome::Shutdown
        } else if self.no_relaunch {
            ChildOutcome::FinishedExpected
        } else {
            ChildOutcome::Died
        }
    }

    /// SIGTERM first; escalate to SIGKILL if the child lingers.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
            if tokio::time::timeout(Duration::from_secs(5), child.wait())
                .await
                .is_ok()
            {
                return;
            }
        }
        let _ = child.kill().await;
    }
}

async fn pump_stderr(stderr: ChildStderr, sink: LineSink) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.write_line(&line);
    }
}

async fn join_pump(pump: Option<tokio::task::JoinHandle<()>>) {
    if let Some(handle) = pump {
        let _ = handle.await;
    }
}

#[cfg(test)]
#[path = "watchdog_tests.rs"]
mod tests;
