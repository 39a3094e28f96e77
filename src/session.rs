//! Per-datagram DHCP message dispatch.
//!
//! Runs once per inbound packet; the server loop spawns one of these
//! per datagram so concurrent clients don't block each other.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::allocator::{self, Pool};
use crate::config::ServerConfig;
use crate::error::DhcpError;
use crate::lease_store::LeaseStore;
use crate::options::{self, DhcpOption};
use crate::packet::DhcpMessage;

const CLIENT_PORT: u16 = 68;
const BROADCAST: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

pub struct SessionContext {
    pub store: LeaseStore,
    pub pool: Pool,
    pub config: Arc<ServerConfig>,
    pub socket: Arc<UdpSocket>,
}

/// Handle one already-parsed inbound datagram. This function never
/// propagates an error; it logs and decides whether and what to reply.
pub async fn handle(ctx: &SessionContext, msg: DhcpMessage) {
    let mac = msg.mac_string();

    match msg.message_type() {
        Some(options::DHCPDISCOVER) => handle_discover(ctx, &msg, &mac).await,
        Some(options::DHCPREQUEST) => handle_request(ctx, &msg, &mac).await,
        Some(options::DHCPRELEASE) => {
            // Log only; let the binding expire naturally rather than deleting it.
            info!(mac = %mac, "DHCPRELEASE received, leaving lease to expire");
        }
        Some(other) => {
            debug!(mac = %mac, message_type = other, "dropping unhandled DHCP message type");
        }
        None => {
            // DhcpMessage::parse already rejects packets without option 53,
            // so this arm is unreachable in practice; keep it defensive.
            warn!(mac = %mac, "dropping packet with no message type");
        }
    }
}

async fn handle_discover(ctx: &SessionContext, msg: &DhcpMessage, mac: &str) {
    match allocator::allocate(&ctx.store, &ctx.pool, mac) {
        Ok(ip) => {
            info!(mac = %mac, ip = %ip, "DHCPOFFER");
            let reply = build_reply(ctx, msg, options::DHCPOFFER, ip, None);
            send_broadcast(ctx, &reply).await;
        }
        Err(e) => log_allocation_error(mac, &e, "DISCOVER could not be satisfied"),
    }
}

async fn handle_request(ctx: &SessionContext, msg: &DhcpMessage, mac: &str) {
    // A server identifier naming a different server means the client
    // picked someone else's OFFER. Drop silently, no NAK.
    if let Some(server_id) = msg.server_identifier() {
        if server_id != ctx.config.listen_addr {
            debug!(mac = %mac, other_server = %server_id, "REQUEST for a different server, dropping");
            return;
        }
    }

    let hostname = msg.hostname();
    match allocator::allocate_and_commit(
        &ctx.store,
        &ctx.pool,
        mac,
        hostname.as_deref(),
        ctx.config.lease_seconds,
    ) {
        Ok(ip) => {
            info!(mac = %mac, ip = %ip, "DHCPACK");
            let reply = build_reply(ctx, msg, options::DHCPACK, ip, hostname.as_deref());
            send_broadcast(ctx, &reply).await;
        }
        Err(e) => log_allocation_error(mac, &e, "REQUEST could not be satisfied, dropping"),
    }
}

/// PoolExhausted and StoreIo are operational failures an operator needs
/// to see, so they log at `error`; everything else stays at `warn`.
fn log_allocation_error(mac: &str, e: &DhcpError, msg: &str) {
    match e {
        DhcpError::PoolExhausted | DhcpError::StoreIo(_) => {
            error!(mac = %mac, error = %e, msg = %msg, "allocation failed")
        }
        _ => warn!(mac = %mac, error = %e, msg = %msg, "allocation failed"),
    }
}

fn build_reply(
    ctx: &SessionContext,
    msg: &DhcpMessage,
    message_type: u8,
    your_ip: Ipv4Addr,
    hostname: Option<&str>,
) -> DhcpMessage {
    let mut opts = vec![
        DhcpOption::subnet_mask(ctx.pool.cidr.netmask()),
        DhcpOption::router(ctx.config.option_router),
    ];
    if !ctx.config.option_dns.is_empty() {
        opts.push(DhcpOption::dns_servers(&ctx.config.option_dns));
    }
    if !ctx.config.option_ntp.is_empty() {
        opts.push(DhcpOption::ntp_servers(&ctx.config.option_ntp));
    }
    opts.push(DhcpOption::lease_time(ctx.config.lease_seconds));
    if let Some(h) = hostname {
        opts.push(DhcpOption::hostname(h));
    }

    DhcpMessage::build_reply(
        message_type,
        msg.xid,
        your_ip,
        &msg.client_mac(),
        ctx.config.listen_addr,
        opts,
    )
}

async fn send_broadcast(ctx: &SessionContext, reply: &DhcpMessage) {
    let bytes = reply.to_bytes();
    if let Err(e) = ctx.socket.send_to(&bytes, (BROADCAST, CLIENT_PORT)).await {
        error!(error = %e, "failed to send DHCP reply");
    }
}
