//! Network module - TCP transports of a cluster member
//!
//! Provides:
//! - RPC server accepting links from other cluster members
//! - RPC client opening links for the RPC pool
//! - Client connector for game clients (frontends only)

mod client;
mod connection;
mod connector;
mod server;

pub use client::*;
pub use connection::*;
pub use connector::*;
pub use server::*;

use std::net::SocketAddr;

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
