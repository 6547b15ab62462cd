// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! operfd: run a measurement configured from the environment.

use operf_daemon::env;
use operf_daemon::measurement::{Measurement, MeasurementConfig};
use operf_daemon::tgen::TGenModelConf;
use operf_daemon::torrc::TorConfigInputs;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let num_transfers = env::num_transfers();
    let config = MeasurementConfig {
        tor_bin: env::tor_bin(),
        tgen_bin: env::tgen_bin(),
        datadir: env::datadir(),
        privatedir: env::privatedir(),
        nickname: env::nickname(),
        do_onion: !env::no_onion(),
        do_inet: !env::no_inet(),
        tor_inputs: TorConfigInputs {
            base_config: env::base_torrc(),
            single_onion: env::single_onion(),
            drop_guards_interval_hours: env::drop_guards_interval_hours(),
            ..Default::default()
        },
        traffic_model: TGenModelConf {
            num_transfers,
            continuous_transfers: num_transfers == 0,
            ..Default::default()
        },
        newnym_interval_seconds: env::newnym_interval_seconds(),
        ..Default::default()
    };

    info!(datadir = %config.datadir.display(), "starting operfd");
    let mut measurement = Measurement::new(config);
    match measurement.run().await {
        Ok(()) => {
            info!("measurement finished");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "measurement failed");
            std::process::ExitCode::FAILURE
        }
    }
}
