// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

/// Base tor configuration prepended to every generated torrc.
pub fn base_torrc() -> String {
    std::env::var("BASETORRC").unwrap_or_default()
}

/// Where measurement state (logs, htdocs, torrc files) lives.
pub fn datadir() -> PathBuf {
    path_var("OPERF_DATADIR", "operf-data")
}

/// Where the onion service key is persisted.
pub fn privatedir() -> PathBuf {
    path_var("OPERF_PRIVATEDIR", "operf-private")
}

/// Path to the tor binary.
pub fn tor_bin() -> PathBuf {
    path_var("OPERF_TOR", "tor")
}

/// Path to the tgen binary.
pub fn tgen_bin() -> PathBuf {
    path_var("OPERF_TGEN", "tgen")
}

/// Node nickname override; parsers infer one from the logs otherwise.
pub fn nickname() -> Option<String> {
    std::env::var("OPERF_NICKNAME").ok().filter(|s| !s.is_empty())
}

/// Run the onion service in non-anonymous single-hop mode.
pub fn single_onion() -> bool {
    flag_var("OPERF_SINGLE_ONION")
}

/// Skip the onion-service measurement path.
pub fn no_onion() -> bool {
    flag_var("OPERF_NO_ONION")
}

/// Skip the direct-inet measurement path.
pub fn no_inet() -> bool {
    flag_var("OPERF_NO_INET")
}

/// Hours between guard drops; zero disables guard dropping.
pub fn drop_guards_interval_hours() -> u64 {
    u64_var("OPERF_DROP_GUARDS_INTERVAL_HOURS", 0)
}

/// Seconds between NEWNYM signals; zero disables them.
pub fn newnym_interval_seconds() -> u64 {
    u64_var("OPERF_NEWNYM_INTERVAL_SECONDS", 300)
}

/// Transfers to run before exiting; zero means run continuously.
pub fn num_transfers() -> u64 {
    u64_var("OPERF_NUM_TRANSFERS", 0)
}

fn path_var(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn flag_var(key: &str) -> bool {
    matches!(
        std::env::var(key).ok().as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

fn u64_var(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
