// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Nightly log rotation and analysis.
//!
//! A single cooperative loop wakes once per second, and once the day's
//! 23:59:59 UTC instant has passed it rotates every watched sink, feeds
//! the tgen/torctl archives through a summaries-only analysis, publishes
//! the compressed document into the docroot, and regenerates the index.
//! Failures are logged; the loop never dies of them.

use crate::docroot;
use crate::sink::LineSink;
use chrono::{DateTime, NaiveTime, Utc};
use operf_core::Clock;
use operf_analysis::{Analysis, AnalysisError};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum RotationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("analysis worker died: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rotates watched sinks at midnight and publishes the day's analysis.
pub struct Rotator<C: Clock> {
    general_sinks: Vec<LineSink>,
    tgen_sink: Option<LineSink>,
    torctl_sink: Option<LineSink>,
    docroot: PathBuf,
    nickname: Option<String>,
    clock: C,
}

impl<C: Clock> Rotator<C> {
    pub fn new(docroot: impl Into<PathBuf>, nickname: Option<String>, clock: C) -> Self {
        Self {
            general_sinks: Vec::new(),
            tgen_sink: None,
            torctl_sink: None,
            docroot: docroot.into(),
            nickname,
            clock,
        }
    }

    /// Watch a sink for rotation only.
    pub fn watch(&mut self, sink: LineSink) {
        self.general_sinks.push(sink);
    }

    /// Watch the client tgen sink; its archive feeds the nightly analysis.
    pub fn watch_tgen(&mut self, sink: LineSink) {
        self.tgen_sink = Some(sink);
    }

    /// Watch the client torctl sink; its archive feeds the nightly analysis.
    pub fn watch_torctl(&mut self, sink: LineSink) {
        self.torctl_sink = Some(sink);
    }

    /// Loop until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut target: Option<DateTime<Utc>> = None;

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            let now = self.clock.utc_now();
            let instant = *target.get_or_insert_with(|| next_rotation(now));
            if now > instant {
                self.rotate_pass(instant).await;
                target = None;
            }
        }
    }

    /// One full rotation pass. Public so operators (and tests) can force
    /// a rotation outside the schedule.
    pub async fn rotate_pass(&self, instant: DateTime<Utc>) {
        info!(instant = %instant, "rotating log files");
        for sink in &self.general_sinks {
            if let Err(e) = sink.rotate(instant) {
                warn!(error = %e, "sink rotation failed");
            }
        }

        if self.tgen_sink.is_some() || self.torctl_sink.is_some() {
            if let Err(e) = self.nightly_analysis(instant).await {
                warn!(error = %e, "nightly analysis failed, continuing");
            }
        }
    }

    async fn nightly_analysis(&self, instant: DateTime<Utc>) -> Result<(), RotationError> {
        let tgen_archive = match &self.tgen_sink {
            Some(sink) => sink.rotate(instant)?,
            None => None,
        };
        let torctl_archive = match &self.torctl_sink {
            Some(sink) => sink.rotate(instant)?,
            None => None,
        };

        // the public address can change between days, so look it up fresh
        let measurement_ip = operf_core::local_ip_address();
        let nickname = self.nickname.clone();
        let docroot = self.docroot.clone();
        let date = instant.date_naive();

        tokio::task::spawn_blocking(move || -> Result<(), AnalysisError> {
            let mut analysis = Analysis::new(nickname, measurement_ip);
            if let Some(path) = tgen_archive {
                analysis.add_tgen_file(path);
            }
            if let Some(path) = torctl_archive {
                analysis.add_torctl_file(path);
            }
            analysis.analyze(false, None)?;
            analysis.save(&docroot, None, true, Some(date))?;
            Ok(())
        })
        .await??;

        docroot::generate_index(&self.docroot)?;
        Ok(())
    }
}

/// The next rotation instant: today's 23:59:59 UTC, or tomorrow's when
/// that has already passed.
fn next_rotation(now: DateTime<Utc>) -> DateTime<Utc> {
    #[allow(clippy::unwrap_used)] // 23:59:59 is always a valid time
    let end = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
    let today = now.date_naive().and_time(end).and_utc();
    if now > today {
        today + chrono::Duration::days(1)
    } else {
        today
    }
}

#[cfg(test)]
#[path = "rotator_tests.rs"]
mod tests;
