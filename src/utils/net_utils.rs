use log::warn;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{Duration, Instant, sleep};

use crate::utils::{Result, ShareError};

pub struct NetUtils;

impl NetUtils {
    /// Create a non-blocking broadcast UDP socket with SO_REUSEADDR (and
    /// SO_REUSEPORT on Unix if available).
    pub async fn create_broadcast_socket(addr: SocketAddr) -> Result<UdpSocket> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| ShareError::NetworkError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| ShareError::NetworkError(format!("Failed to set reuse_address: {}", e)))?;

        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        {
            if let Err(e) = socket.set_reuse_port(true) {
                warn!("Could not set SO_REUSEPORT (not critical): {}", e);
            }
        }

        socket
            .set_broadcast(true)
            .map_err(|e| ShareError::NetworkError(format!("Failed to set broadcast: {}", e)))?;

        socket
            .bind(&addr.into())
            .map_err(|e| ShareError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| ShareError::NetworkError(format!("Failed to set nonblocking: {}", e)))?;

        let std_socket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| {
            ShareError::NetworkError(format!("Failed to convert to tokio socket: {}", e))
        })
    }

    /// Wait until something accepts TCP connections on `addr`.
    pub async fn wait_for_port_ready(addr: SocketAddr, timeout_duration: Duration) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout_duration {
            if TcpStream::connect(addr).await.is_ok() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_sockets_share_a_port() {
        let first = NetUtils::create_broadcast_socket("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();
        let second = NetUtils::create_broadcast_socket(addr).await;
        assert!(second.is_ok());
    }
}
