use anyhow::Context;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves `host` with the system resolver on the blocking pool.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, anyhow::Error> {
    debug!("Resolving DNS for: {}", host);

    let name = host.to_string();
    let addrs: Vec<SocketAddr> =
        tokio::task::spawn_blocking(move || (name.as_str(), port).to_socket_addrs())
            .await?
            .with_context(|| format!("Failed to resolve {}", host))?
            .collect();
    ensure!(!addrs.is_empty(), "No IP addresses found for host {}", host);

    debug!("Resolved {} to {:?}", host, addrs);
    Ok(addrs)
}
