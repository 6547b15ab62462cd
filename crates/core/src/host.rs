// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host identity: local host name and measurement IP discovery.

use regex::Regex;
use std::net::UdpSocket;
use std::sync::OnceLock;

/// The local host name, used as the node nickname of last resort.
pub fn local_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}

/// Pull the first IPv4 address out of a blob of text, if any.
pub fn find_ip_address(data: &str) -> Option<String> {
    static IPV4: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)] // pattern is a literal
    let re = IPV4.get_or_init(|| Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").unwrap());
    re.find(data).map(|m| m.as_str().to_string())
}

/// The address this host uses for outbound connections.
///
/// Connecting a UDP socket does not send any packet; it only asks the
/// kernel for a route, whose source address is what we want.
pub fn local_ip_address() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:53").ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip().to_string())
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
