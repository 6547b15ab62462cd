// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tor configuration assembly.
//!
//! The configuration is concatenated in a fixed order: the `BASETORRC`
//! environment content, the built-in template, the role-specific
//! override file, and (for clients) the inline snippet. Guard use is
//! disabled by default so a single guard node is not measured over and
//! over, unless the operator configured guards/bridges explicitly or
//! guard-dropping is active.

use std::io;
use std::path::{Path, PathBuf};

/// Which daemon this configuration is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorRole {
    Client,
    Server,
}

/// Operator-supplied configuration inputs.
#[derive(Debug, Clone, Default)]
pub struct TorConfigInputs {
    /// Prepended verbatim (from the `BASETORRC` environment variable).
    pub base_config: String,
    /// Extra torrc file appended for the client daemon.
    pub client_conf_file: Option<PathBuf>,
    /// Extra torrc file appended for the server daemon.
    pub server_conf_file: Option<PathBuf>,
    /// Inline snippet appended for the client daemon.
    pub additional_client_conf: Option<String>,
    /// Run the onion service in non-anonymous single-hop mode.
    pub single_onion: bool,
    /// Hours between guard drops; zero disables guard dropping.
    pub drop_guards_interval_hours: u64,
}

/// Assemble the torrc content for one role.
pub fn create_tor_config(
    role: TorRole,
    control_port: u16,
    socks_port: u16,
    tor_datadir: &Path,
    inputs: &TorConfigInputs,
) -> io::Result<String> {
    let mut config = format!(
        "{base}RunAsDaemon 0\nORPort 0\nDirPort 0\nControlPort {control_port}\n\
         SocksPort {socks_port}\nSocksListenAddress 127.0.0.1\nClientOnly 1\n\
         WarnUnsafeSocks 0\nSafeLogging 0\nMaxCircuitDirtiness 60 seconds\n\
         DataDirectory {datadir}\nDataDirectoryGroupReadable 1\nLog INFO stdout\n",
        base = inputs.base_config,
        datadir = tor_datadir.display(),
    );

    match role {
        TorRole::Server => {
            if let Some(path) = &inputs.server_conf_file {
                config.push_str(&std::fs::read_to_string(path)?);
            }
        }
        TorRole::Client => {
            if let Some(path) = &inputs.client_conf_file {
                config.push_str(&std::fs::read_to_string(path)?);
            }
            if let Some(extra) = &inputs.additional_client_conf {
                config.push_str(extra);
                if !extra.ends_with('\n') {
                    config.push('\n');
                }
            }
        }
    }

    if !config.contains("UseEntryGuards")
        && !config.contains("UseBridges")
        && inputs.drop_guards_interval_hours == 0
    {
        config.push_str("UseEntryGuards 0\n");
    }
    if role == TorRole::Server && inputs.single_onion {
        config.push_str("HiddenServiceSingleHopMode 1\nHiddenServiceNonAnonymousMode 1\n");
    }

    Ok(config)
}

#[cfg(test)]
#[path = "torrc_tests.rs"]
mod tests;
