// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Detection of silently dropped TCP connections.
//!
//! A write on a socket whose peer went away usually succeeds, so the TCP
//! transport can lose records before it notices anything. When disconnect
//! detection is on, the transport remembers the endpoint pair of its connection
//! and looks it up in the OS connection table before every write. The socket is
//! reused only while the table still lists it as `ESTABLISHED`.
//!
//! On Linux the table is read from `/proc/net/tcp` and `/proc/net/tcp6`. On
//! other platforms, or if the table cannot be read, the state is
//! [`ConnectionState::Unsupported`] and the connection is assumed healthy.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::TcpStream;

/// Local and remote endpoints of one connection, in both IPv4 and IPv6 forms.
///
/// A dual-stack socket may be listed with IPv4-mapped IPv6 addresses
/// (`::ffff:a.b.c.d`) while the socket API reported plain IPv4, or the other
/// way around, so both spellings are accepted when matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFingerprint {
    local: [Option<SocketAddr>; 2],
    remote: [Option<SocketAddr>; 2],
}

impl ConnectionFingerprint {
    #[must_use]
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local: spellings(local),
            remote: spellings(remote),
        }
    }

    pub fn from_stream(stream: &TcpStream) -> io::Result<Self> {
        Ok(Self::new(stream.local_addr()?, stream.peer_addr()?))
    }

    #[must_use]
    pub fn is_same_connection(&self, local: SocketAddr, remote: SocketAddr) -> bool {
        self.local.contains(&Some(local)) && self.remote.contains(&Some(remote))
    }
}

fn spellings(addr: SocketAddr) -> [Option<SocketAddr>; 2] {
    let port = addr.port();
    let (v4, v6) = match addr.ip() {
        IpAddr::V4(ip) => (Some(ip), ip.to_ipv6_mapped()),
        IpAddr::V6(ip) => (ip.to_ipv4_mapped(), ip),
    };
    [
        v4.map(|ip| SocketAddr::new(IpAddr::V4(ip), port)),
        Some(SocketAddr::new(IpAddr::V6(v6), port)),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Established,
    /// Missing from the table or in any state other than established.
    Closed,
    /// The connection table is not available on this platform.
    Unsupported,
}

/// One row of the OS connection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpEntry {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub established: bool,
}

/// Looks the fingerprinted connection up in the OS connection table.
pub async fn check(fingerprint: &ConnectionFingerprint) -> ConnectionState {
    let Some(entries) = active_connections().await else {
        return ConnectionState::Unsupported;
    };
    match entries
        .iter()
        .find(|entry| fingerprint.is_same_connection(entry.local, entry.remote))
    {
        Some(entry) if entry.established => ConnectionState::Established,
        _ => ConnectionState::Closed,
    }
}

#[cfg(target_os = "linux")]
async fn active_connections() -> Option<Vec<TcpEntry>> {
    let (v4, v6) = tokio::join!(
        tokio::fs::read_to_string("/proc/net/tcp"),
        tokio::fs::read_to_string("/proc/net/tcp6"),
    );
    let (v4, v6) = (v4.ok(), v6.ok());
    if v4.is_none() && v6.is_none() {
        return None;
    }

    let mut entries = Vec::new();
    if let Some(table) = v4 {
        entries.extend(parse_proc_net_tcp(&table));
    }
    if let Some(table) = v6 {
        entries.extend(parse_proc_net_tcp(&table));
    }
    Some(entries)
}

#[cfg(not(target_os = "linux"))]
async fn active_connections() -> Option<Vec<TcpEntry>> {
    None
}

/// Parses the content of `/proc/net/tcp` or `/proc/net/tcp6`.
///
/// Addresses are hex encoded 32-bit words in host byte order, ports are hex in
/// network order. Malformed rows are skipped.
#[must_use]
pub fn parse_proc_net_tcp(table: &str) -> Vec<TcpEntry> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace().skip(1);
            let local = parse_endpoint(columns.next()?)?;
            let remote = parse_endpoint(columns.next()?)?;
            // 01 is TCP_ESTABLISHED
            let established = columns.next()? == "01";
            Some(TcpEntry {
                local,
                remote,
                established,
            })
        })
        .collect()
}

fn parse_endpoint(column: &str) -> Option<SocketAddr> {
    let (addr, port) = column.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match addr.len() {
        8 => IpAddr::V4(Ipv4Addr::from(parse_word(addr)?)),
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                chunk.copy_from_slice(&parse_word(addr.get(i * 8..i * 8 + 8)?)?);
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

fn parse_word(hex: &str) -> Option<[u8; 4]> {
    u32::from_str_radix(hex, 16).ok().map(u32::to_ne_bytes)
}
