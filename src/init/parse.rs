// SPDX-License-Identifier: Apache-2.0

use std::net::{SocketAddr, ToSocketAddrs};
use tower::BoxError;

/// Parse a listen endpoint such as `localhost:9090`, `0.0.0.0:9090` or `[::1]:9090`
pub fn parse_endpoint(s: &str) -> Result<SocketAddr, BoxError> {
    // Use actual localhost address instead of localhost name
    let s = match s.strip_prefix("localhost:") {
        Some(port) => format!("127.0.0.1:{}", port),
        None => s.to_string(),
    };

    if let Ok(sa) = s.parse::<SocketAddr>() {
        return Ok(sa);
    }

    // Fall back to resolving a host name, taking the first address
    s.to_socket_addrs()
        .map_err(|e| format!("invalid endpoint `{}`: {}", s, e))?
        .next()
        .ok_or_else(|| format!("endpoint `{}` did not resolve to an address", s).into())
}
