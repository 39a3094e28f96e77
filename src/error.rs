use thiserror::Error;

/// Error taxonomy for the server-side protocol engine.
///
/// Every variant maps to one policy in the error handling design: the
/// caller logs at the prescribed level and drops the datagram. No
/// variant here is surfaced to the DHCP client.
#[derive(Error, Debug)]
pub enum DhcpError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("address pool exhausted")]
    PoolExhausted,

    #[error("lease store I/O error: {0}")]
    StoreIo(#[from] rusqlite::Error),

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DhcpError>;
