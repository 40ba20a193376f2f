use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake with {addr} failed: {reason}")]
    HandshakeFailed { addr: SocketAddr, reason: String },

    #[error("connection broken: {0} consecutive retries without a new acknowledgment")]
    ConnectionBroken(u32),
}
