// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reference binary: wires the sans-I/O `waynode` core to a real
//! `tokio` UDP socket (the "channel" collaborator), resolves bootstrap
//! hosts (the "address resolver" collaborator), and serves a small
//! `axum` status endpoint for operational visibility. Not part of the
//! specified core; this is the scaffolding that makes the crate a
//! runnable node rather than a library with no consumer.

use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use std::{
    net::SocketAddr,
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use serde_derive::Serialize;
use tokio::{net::UdpSocket, sync::Mutex};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use waynode::{node::AddrId, Config, Dht, NodeId, SupportedAddr};

#[derive(Parser, Debug)]
#[command(name = "waynode-node", about = "A BitTorrent Mainline DHT node")]
struct Args {
    /// Address to bind the DHT's UDP socket to.
    #[arg(long, env = "WAYNODE_BIND", default_value = "0.0.0.0:6881")]
    bind: SocketAddr,

    /// Address to serve the health/status HTTP endpoint on.
    #[arg(long, env = "WAYNODE_STATUS_BIND", default_value = "127.0.0.1:6880")]
    status_bind: SocketAddr,

    /// This node's IPv4 id, as 40 hex characters. A random id is used
    /// when absent.
    #[arg(long, env = "WAYNODE_NODE_ID")]
    node_id: Option<String>,

    /// Bootstrap nodes to seed the routing table from, `host:port`,
    /// repeatable or comma-separated. Names are resolved with
    /// `tokio::net::lookup_host`.
    #[arg(long, env = "WAYNODE_BOOTSTRAP", value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Bytes stamped into outbound messages as the KRPC `v` field.
    #[arg(long, env = "WAYNODE_CLIENT_VERSION")]
    client_version: Option<String>,

    /// Default per-query timeout, in seconds.
    #[arg(long, env = "WAYNODE_QUERY_TIMEOUT_SECS", default_value_t = 30)]
    query_timeout_secs: u64,

    /// Run as a BEP 43 read-only node: never answer queries, and stamp
    /// `ro=1` on everything sent.
    #[arg(long, env = "WAYNODE_READ_ONLY")]
    read_only: bool,

    /// Bucket capacity (Kademlia K).
    #[arg(long, env = "WAYNODE_MAX_NODE_COUNT_PER_BUCKET", default_value_t = 8)]
    max_node_count_per_bucket: usize,
}

#[derive(Clone, Serialize)]
struct Status {
    routing_table_len: usize,
    outstanding_transaction_count: usize,
}

async fn status_handler(State(dht): State<Arc<Mutex<Dht>>>) -> Json<Status> {
    let dht = dht.lock().await;
    Json(Status {
        routing_table_len: dht.routing_table_len(),
        outstanding_transaction_count: dht.outstanding_transaction_count(),
    })
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Resolves each `host:port` bootstrap entry to a concrete address,
/// skipping entries that fail to resolve (spec §9: a resolver failure
/// silently drops the corresponding neighbor, never a hard error).
async fn resolve_bootstrap(entries: &[String]) -> Vec<AddrId<SocketAddr>> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match tokio::net::lookup_host(entry.as_str()).await {
            Ok(mut addrs) => {
                if let Some(addr) = addrs.next() {
                    out.push(AddrId::from(addr));
                } else {
                    warn!("bootstrap host {entry} resolved to no addresses");
                }
            }
            Err(err) => warn!("failed to resolve bootstrap host {entry}: {err}"),
        }
    }
    out
}

#[cfg(target_os = "linux")]
fn init_logging() {
    use tracing_subscriber::prelude::*;
    tracing_log::LogTracer::init().ok();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer());
    match tracing_journald::layer() {
        Ok(journald) => subscriber.with(journald).init(),
        Err(err) => {
            subscriber.init();
            warn!("journald logging unavailable, falling back to stderr: {err}");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn init_logging() {
    tracing_log::LogTracer::init().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Notifies the service manager that startup finished and, if a
/// watchdog interval was configured, spawns a task that pings it at
/// half that interval for as long as the process runs.
#[cfg(target_os = "linux")]
fn notify_systemd_ready() {
    use libsystemd::daemon::{self, NotifyState};
    if let Err(err) = daemon::notify(false, &[NotifyState::Ready]) {
        debug!("sd_notify READY failed (likely not running under systemd): {err}");
        return;
    }
    if let Some(interval) = daemon::watchdog_enabled(false) {
        let ping_every = interval / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_every);
            loop {
                ticker.tick().await;
                if let Err(err) = daemon::notify(false, &[NotifyState::Watchdog]) {
                    warn!("sd_notify WATCHDOG failed: {err}");
                }
            }
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_systemd_ready() {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let ipv4_node_id = match &args.node_id {
        Some(hex) => NodeId::from_str(hex)
            .map_err(|_| anyhow::anyhow!("--node-id must be 40 hex characters"))?,
        None => NodeId::rand()?,
    };
    info!(%ipv4_node_id, "starting waynode node");

    let config = Config {
        ipv4_node_id: Some(ipv4_node_id),
        ipv6_node_id: None,
        client_version: args
            .client_version
            .map(|v| serde_bytes::ByteBuf::from(v.into_bytes())),
        default_query_timeout: Duration::from_secs(args.query_timeout_secs),
        is_read_only_node: args.read_only,
        max_node_count_per_bucket: args.max_node_count_per_bucket,
        supported_addr: SupportedAddr::Ipv4,
    };

    let bootstrap = resolve_bootstrap(&args.bootstrap).await;
    let dht = Arc::new(Mutex::new(Dht::with_config(
        config,
        std::iter::empty(),
        bootstrap,
    )?));

    let socket = Arc::new(UdpSocket::bind(args.bind).await?);
    info!(bind = %args.bind, "listening for KRPC datagrams");

    let status_app = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
        .with_state(dht.clone());
    let status_listener = tokio::net::TcpListener::bind(args.status_bind).await?;
    info!(bind = %args.status_bind, "serving status endpoint");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(status_listener, status_app).await {
            warn!("status server exited: {err}");
        }
    });

    notify_systemd_ready();

    run_event_loop(dht, socket).await
}

/// Drives the sans-I/O core: reads datagrams, delivers timeouts, and
/// drains every staged outbound message and dispatched inbound event
/// after each wakeup.
async fn run_event_loop(dht: Arc<Mutex<Dht>>, socket: Arc<UdpSocket>) -> anyhow::Result<()> {
    let mut buf = vec![0u8; 65535];
    loop {
        let sleep_for = {
            let dht = dht.lock().await;
            dht.timeout().unwrap_or(Duration::from_secs(300))
        };

        tokio::select! {
            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((len, addr)) => {
                        let mut dht = dht.lock().await;
                        if let Err(err) = dht.on_recv(&buf[..len], addr) {
                            debug!("dropping malformed datagram from {addr}: {err}");
                        }
                    }
                    Err(err) => warn!("udp recv_from failed: {err}"),
                }
            }
            () = tokio::time::sleep(sleep_for) => {
                let mut dht = dht.lock().await;
                if let Err(err) = dht.on_timeout() {
                    warn!("on_timeout failed: {err}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                let mut dht = dht.lock().await;
                dht.cancel();
                break;
            }
        }

        drain_outbound(&dht, &socket).await;
        drain_inbound(&dht).await;
    }
    Ok(())
}

async fn drain_outbound(dht: &Arc<Mutex<Dht>>, socket: &Arc<UdpSocket>) {
    let mut out = vec![0u8; 65535];
    loop {
        let send_info = {
            let mut dht = dht.lock().await;
            match dht.send_to(&mut out) {
                Ok(Some(info)) => info,
                Ok(None) => return,
                Err(err) => {
                    warn!("failed to encode outbound message: {err}");
                    return;
                }
            }
        };
        if let Err(err) = socket.send_to(&out[..send_info.len], send_info.addr).await {
            warn!("udp send_to {} failed: {err}", send_info.addr);
        }
    }
}

async fn drain_inbound(dht: &Arc<Mutex<Dht>>) {
    let mut dht = dht.lock().await;
    while let Some(event) = dht.read() {
        debug!(addr = %event.addr_id.addr(), "dispatched inbound event");
    }
}
