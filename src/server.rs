//! Server loop: owns the UDP endpoint, spawns a handler per datagram,
//! and runs the periodic expiry sweep.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket as TokioUdpSocket;
use tracing::{debug, info, warn};

use crate::allocator::Pool;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::lease_store::LeaseStore;
use crate::packet::DhcpMessage;
use crate::session::{self, SessionContext};

const SERVER_PORT: u16 = 67;
const SOCKET_BUFFER_HINT: usize = 4096;

fn bind_server_socket(config: &ServerConfig) -> Result<TokioUdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_HINT)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_HINT)?;

    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, SERVER_PORT).into();
    socket.bind(&addr.into())?;

    #[cfg(target_os = "linux")]
    if let Some(ref iface) = config.interface {
        socket.bind_device(Some(iface.as_bytes()))?;
        info!(interface = %iface, "DHCP socket bound to interface");
    }
    #[cfg(not(target_os = "linux"))]
    let _ = config;

    socket.set_nonblocking(true)?;
    Ok(TokioUdpSocket::from_std(socket.into())?)
}

/// Run the server until a shutdown signal is received. Returns once the
/// accept loop has stopped; any handlers already spawned are allowed to
/// finish on their own. Cancellation happens at the accept loop, not
/// mid-handler.
pub async fn run(config: Arc<ServerConfig>, store: LeaseStore) -> Result<()> {
    let pool = Pool::new(config.pool_cidr, config.excluded_ips.iter().copied());
    let socket = Arc::new(bind_server_socket(&config)?);

    info!(addr = %config.listen_addr, pool = %config.pool_cidr, "DHCP server listening on 0.0.0.0:67");

    let ctx = Arc::new(SessionContext {
        store: store.clone(),
        pool,
        config: config.clone(),
        socket: socket.clone(),
    });

    let sweeper = tokio::spawn(run_sweeper(store, config.sweep_interval_secs));

    let accept_loop = accept_loop(socket, ctx);

    tokio::select! {
        result = accept_loop => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, closing DHCP listener");
        }
    }

    sweeper.abort();
    Ok(())
}

async fn accept_loop(socket: Arc<TokioUdpSocket>, ctx: Arc<SessionContext>) -> Result<()> {
    let mut buf = [0u8; SOCKET_BUFFER_HINT];
    loop {
        let (len, _src) = socket.recv_from(&mut buf).await?;
        let datagram = buf[..len].to_vec();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            match DhcpMessage::parse(&datagram) {
                Ok(msg) if msg.op == 1 => session::handle(&ctx, msg).await,
                Ok(_) => debug!("dropping non-BOOTREQUEST datagram"),
                Err(e) => warn!(error = %e, "dropping malformed packet"),
            }
        });
    }
}

async fn run_sweeper(store: LeaseStore, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        match store.sweep_expired() {
            Ok(0) => {}
            Ok(n) => info!(count = n, "swept expired leases"),
            Err(e) => warn!(error = %e, "lease sweep failed"),
        }
    }
}
