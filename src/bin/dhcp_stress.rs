//! Multi-client stress harness.
//!
//! Not a conforming DHCP client: no retransmission backoff, no lease
//! persistence. It exists to drive K concurrent DISCOVER+REQUEST flows
//! from K distinct MACs against a running server and report whether
//! every client got a distinct, successfully-acknowledged IP.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use rdhcpd::options::{self, DhcpOption};
use rdhcpd::packet::DhcpMessage;

const SERVER_PORT: u16 = 67;
const CLIENT_PORT: u16 = 68;
const BROADCAST: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);
const SOCKET_BUFFER_HINT: usize = 4096;

#[derive(Parser, Debug)]
#[clap(version, about = "Concurrent DHCP client stress harness")]
struct Args {
    /// Number of simulated clients to run concurrently.
    #[arg(short, long, default_value_t = 10)]
    clients: u32,

    /// Seconds to wait for an OFFER/ACK before declaring a client failed.
    #[arg(long, default_value_t = 3)]
    timeout_secs: u64,

    /// After a successful ACK, wait this long then send a renewing REQUEST.
    #[arg(long, default_value_t = 0)]
    renew_after_secs: u64,
}

type PendingMap = Arc<Mutex<HashMap<u32, mpsc::UnboundedSender<DhcpMessage>>>>;

#[derive(Debug, Default)]
struct ClientReport {
    discovered_ip: Option<Ipv4Addr>,
    acked_ip: Option<Ipv4Addr>,
    renewed: bool,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let socket = Arc::new(bind_client_socket()?);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(receive_loop(socket.clone(), pending.clone()));

    let mut handles = Vec::with_capacity(args.clients as usize);
    for i in 0..args.clients {
        let socket = socket.clone();
        let pending = pending.clone();
        let timeout = Duration::from_secs(args.timeout_secs);
        let renew_after = Duration::from_secs(args.renew_after_secs);
        handles.push(tokio::spawn(async move {
            run_client(i, socket, pending, timeout, renew_after).await
        }));
    }

    let mut reports = Vec::new();
    for h in handles {
        reports.push(h.await?);
    }

    let acked: Vec<Ipv4Addr> = reports.iter().filter_map(|r| r.acked_ip).collect();
    let distinct: std::collections::HashSet<_> = acked.iter().collect();
    let failures = reports.iter().filter(|r| r.error.is_some()).count();

    info!(
        total = reports.len(),
        acked = acked.len(),
        distinct_ips = distinct.len(),
        failures,
        "stress run complete"
    );

    for (i, r) in reports.iter().enumerate() {
        if let Some(ref e) = r.error {
            warn!(client = i, error = %e, "client failed");
        }
    }

    Ok(())
}

fn bind_client_socket() -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    let addr: std::net::SocketAddr = (Ipv4Addr::UNSPECIFIED, CLIENT_PORT).into();
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

async fn receive_loop(socket: Arc<UdpSocket>, pending: PendingMap) {
    let mut buf = [0u8; SOCKET_BUFFER_HINT];
    loop {
        let (len, _src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "stress harness recv error");
                continue;
            }
        };
        let msg = match DhcpMessage::parse(&buf[..len]) {
            Ok(m) if m.op == 2 => m,
            _ => continue,
        };
        let tx = pending.lock().await.get(&msg.xid).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(msg);
        }
    }
}

fn synthetic_mac(index: u32) -> [u8; 6] {
    let b = index.to_be_bytes();
    [0xde, 0xad, 0xbe, 0xef, b[2], b[3]]
}

async fn run_client(
    index: u32,
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    timeout: Duration,
    renew_after: Duration,
) -> ClientReport {
    let mac = synthetic_mac(index);
    let mut report = ClientReport::default();

    let discover_xid = rand::thread_rng().gen();
    let (tx, mut rx) = mpsc::unbounded_channel();
    pending.lock().await.insert(discover_xid, tx);

    let discover = build_request(discover_xid, &mac, options::DHCPDISCOVER, None);
    if let Err(e) = socket.send_to(&discover.to_bytes(), (BROADCAST, SERVER_PORT)).await {
        report.error = Some(format!("send DISCOVER failed: {e}"));
        pending.lock().await.remove(&discover_xid);
        return report;
    }

    let offer = match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(m)) if m.message_type() == Some(options::DHCPOFFER) => m,
        Ok(Some(_)) => {
            report.error = Some("unexpected reply to DISCOVER".to_string());
            pending.lock().await.remove(&discover_xid);
            return report;
        }
        _ => {
            report.error = Some("timed out waiting for OFFER".to_string());
            pending.lock().await.remove(&discover_xid);
            return report;
        }
    };
    pending.lock().await.remove(&discover_xid);
    report.discovered_ip = Some(offer.yiaddr);

    match send_request_and_wait(&socket, &pending, &mac, offer.yiaddr, timeout).await {
        Ok(ip) => report.acked_ip = Some(ip),
        Err(e) => {
            report.error = Some(e);
            return report;
        }
    }

    if !renew_after.is_zero() {
        tokio::time::sleep(renew_after).await;
        match send_request_and_wait(&socket, &pending, &mac, offer.yiaddr, timeout).await {
            Ok(_) => report.renewed = true,
            Err(e) => report.error = Some(format!("renewal failed: {e}")),
        }
    }

    report
}

async fn send_request_and_wait(
    socket: &UdpSocket,
    pending: &PendingMap,
    mac: &[u8; 6],
    requested_ip: Ipv4Addr,
    timeout: Duration,
) -> Result<Ipv4Addr, String> {
    let xid = rand::thread_rng().gen();
    let (tx, mut rx) = mpsc::unbounded_channel();
    pending.lock().await.insert(xid, tx);

    let request = build_request(xid, mac, options::DHCPREQUEST, Some(requested_ip));
    if let Err(e) = socket.send_to(&request.to_bytes(), (BROADCAST, SERVER_PORT)).await {
        pending.lock().await.remove(&xid);
        return Err(format!("send REQUEST failed: {e}"));
    }

    let result = match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(m)) if m.message_type() == Some(options::DHCPACK) => Ok(m.yiaddr),
        Ok(Some(_)) => Err("unexpected reply to REQUEST".to_string()),
        _ => Err("timed out waiting for ACK".to_string()),
    };
    pending.lock().await.remove(&xid);
    result
}

fn build_request(xid: u32, mac: &[u8; 6], message_type: u8, requested_ip: Option<Ipv4Addr>) -> DhcpMessage {
    let mut chaddr = [0u8; 16];
    chaddr[..6].copy_from_slice(mac);

    let mut opts = vec![DhcpOption::msg_type(message_type)];
    if let Some(ip) = requested_ip {
        opts.push(DhcpOption::requested_ip(ip));
    }

    DhcpMessage {
        op: 1, // BOOTREQUEST
        htype: 1,
        hlen: 6,
        hops: 0,
        xid,
        secs: 0,
        flags: 0x8000, // ask for a broadcast reply; we have no IP yet
        ciaddr: Ipv4Addr::UNSPECIFIED,
        yiaddr: Ipv4Addr::UNSPECIFIED,
        siaddr: Ipv4Addr::UNSPECIFIED,
        giaddr: Ipv4Addr::UNSPECIFIED,
        chaddr,
        sname: [0u8; 64],
        file: [0u8; 128],
        options: opts,
    }
}
