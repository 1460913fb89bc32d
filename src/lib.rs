// Copyright 2020 Bryant Luk
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Waynode is a library which can help build an application using the [BitTorrent][bittorrent]
//! [Distributed Hash Table][bep_0005].
//!
//! The orchestrator, [`Dht`], is sans-I/O: it never opens a socket.
//! Bytes come in through [`Dht::on_recv`], outbound datagrams are
//! drained through [`Dht::send_to`], and [`Dht::timeout`] tells the
//! host when to next call [`Dht::on_timeout`]. This keeps the core
//! testable without a network and usable from any runtime (a bare
//! `UdpSocket` loop, `tokio`, or anything else).
//!
//! [bittorrent]: http://bittorrent.org/
//! [bep_0005]: http://bittorrent.org/beps/bep_0005.html

// http://bittorrent.org/beps/bep_0005.html
// http://bittorrent.org/beps/bep_0042.html
// http://bittorrent.org/beps/bep_0043.html

pub(crate) mod address_validator;
pub mod error;
pub(crate) mod handler;
pub mod krpc;
pub mod msg_buffer;
pub mod node;
pub(crate) mod ops;
pub(crate) mod routing;
pub mod secret;
pub mod torrent;
pub(crate) mod transaction;

use crate::{
    krpc::{ErrorVal, Kind, Msg, QueryArgs, QueryMsg, RespMsg, RespVal},
    msg_buffer::ReadEvent,
    node::{Addr, AddrId},
};
use bt_bencode::Value;
use std::{
    net::{SocketAddr, SocketAddrV4, SocketAddrV6},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// How often the `get_peers`/`announce_peer` token secret rotates (spec
/// §3/§4.10). A token stays valid for up to two rotations after it was
/// minted.
const TOKEN_ROTATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Information about the data to send.
#[derive(Clone, Copy, Debug)]
pub struct SendInfo {
    /// The length of the buffer filled with bytes to send.
    pub len: usize,
    /// The socket address to send the data to.
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The types of addresses supported.
pub enum SupportedAddr {
    Ipv4,
    Ipv6,
    Ipv4AndIpv6,
}

/// The configuration for the local DHT node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Local node id used as the pivot for the IPv4 routing table and
    /// for replies/queries sent over IPv4 (spec §6 `ipv4NodeID`).
    /// Required when `supported_addr` includes IPv4.
    pub ipv4_node_id: Option<node::Id>,
    /// Local node id used as the pivot for the IPv6 routing table and
    /// for replies/queries sent over IPv6 (spec §6 `ipv6NodeID`).
    /// Required when `supported_addr` includes IPv6.
    pub ipv6_node_id: Option<node::Id>,
    /// Client version identifier
    pub client_version: Option<serde_bytes::ByteBuf>,
    /// The default amount of time before a query without a response is considered timed out
    pub default_query_timeout: Duration,
    /// If the node is read only (spec §4.4/BEP 43): never answers queries
    /// and stamps `ro=1` on everything it sends.
    pub is_read_only_node: bool,
    /// The max amount of nodes in a routing table bucket
    pub max_node_count_per_bucket: usize,
    /// The types of socket addresses supported.
    pub supported_addr: SupportedAddr,
}

impl Config {
    /// The local pivot for `addr`'s address family, if one is
    /// configured (spec §6 `ipv4NodeID`/`ipv6NodeID`).
    #[must_use]
    pub fn pivot(&self, addr: SocketAddr) -> Option<node::Id> {
        match addr {
            SocketAddr::V4(_) => self.ipv4_node_id,
            SocketAddr::V6(_) => self.ipv6_node_id,
        }
    }

    /// Like [`Self::pivot`], but turns an unconfigured family into a
    /// `ReceivedMalformedMessage` rather than panicking: a dual-homed
    /// host can still hand this node a datagram from a family it never
    /// asked to support.
    pub(crate) fn pivot_or_err(&self, addr: SocketAddr) -> Result<node::Id, error::Error> {
        self.pivot(addr).ok_or_else(|| {
            error::Error::ReceivedMalformedMessage(format!(
                "no local node id configured for {addr}'s address family"
            ))
        })
    }
}

/// The distributed hash table node: owns the routing table, the
/// outstanding-transaction ledger, the staged outbound/inbound buffer,
/// the in-flight iterative operations, and the `get_peers`/
/// `announce_peer` collaborators (token secret, peer store).
#[derive(Debug)]
pub struct Dht {
    config: Config,
    routing_table: routing::RoutingTable,
    tx_manager: transaction::Manager,
    msg_buffer: msg_buffer::Buffer,

    ping_ops: Vec<ops::ping::PingOp>,
    find_node_ops: Vec<ops::find_node::FindNodeOp>,
    get_peers_ops: Vec<ops::get_peers::GetPeersOp>,

    secrets: secret::TokenPair,
    peer_store: torrent::PeerStore,
    next_token_rotation: Instant,
}

impl Dht {
    /// Builds a node, seeding its routing table with `existing_addr_ids`
    /// (contacts already known to have the paired id) and starting a
    /// bootstrap `find_node` toward its own id through
    /// `bootstrap_addr_ids` (spec §4.1 initialization).
    pub fn with_config<'a, A, B>(
        config: Config,
        existing_addr_ids: A,
        bootstrap_addr_ids: B,
    ) -> Result<Self, error::Error>
    where
        A: IntoIterator<Item = &'a AddrId<SocketAddr>>,
        B: IntoIterator<Item = AddrId<SocketAddr>>,
    {
        let max_node_count_per_bucket = config.max_node_count_per_bucket;
        let now = Instant::now();

        let missing_pivot = match config.supported_addr {
            SupportedAddr::Ipv4 => config.ipv4_node_id.is_none(),
            SupportedAddr::Ipv6 => config.ipv6_node_id.is_none(),
            SupportedAddr::Ipv4AndIpv6 => {
                config.ipv4_node_id.is_none() || config.ipv6_node_id.is_none()
            }
        };
        if missing_pivot {
            return Err(error::Error::InvalidNodeId);
        }

        let existing: Vec<AddrId<SocketAddr>> = existing_addr_ids.into_iter().copied().collect();
        let existing_v4: Vec<AddrId<SocketAddrV4>> =
            existing.iter().filter_map(|a| a.as_v4()).collect();
        let existing_v6: Vec<AddrId<SocketAddrV6>> =
            existing.iter().filter_map(|a| a.as_v6()).collect();

        let routing_table = match config.supported_addr {
            SupportedAddr::Ipv4 => routing::RoutingTable::Ipv4(routing::Table::new(
                config.ipv4_node_id.expect("validated above"),
                max_node_count_per_bucket,
                &existing_v4,
            )),
            SupportedAddr::Ipv6 => routing::RoutingTable::Ipv6(routing::Table::new(
                config.ipv6_node_id.expect("validated above"),
                max_node_count_per_bucket,
                &existing_v6,
            )),
            SupportedAddr::Ipv4AndIpv6 => routing::RoutingTable::Ipv4AndIpv6(
                routing::Table::new(
                    config.ipv4_node_id.expect("validated above"),
                    max_node_count_per_bucket,
                    &existing_v4,
                ),
                routing::Table::new(
                    config.ipv6_node_id.expect("validated above"),
                    max_node_count_per_bucket,
                    &existing_v6,
                ),
            ),
        };

        let mut dht = Self {
            config,
            routing_table,
            tx_manager: transaction::Manager::new(),
            msg_buffer: msg_buffer::Buffer::new(),
            ping_ops: Vec::new(),
            find_node_ops: Vec::new(),
            get_peers_ops: Vec::new(),
            secrets: secret::TokenPair::new()?,
            peer_store: torrent::PeerStore::new(),
            next_token_rotation: now + TOKEN_ROTATE_INTERVAL,
        };

        let bootstrap: Vec<AddrId<SocketAddr>> = bootstrap_addr_ids.into_iter().collect();
        if !bootstrap.is_empty() {
            // The self-lookup only needs *a* pivot to seed the routing
            // table(s); whichever family is configured first is fine
            // since the goal is population, not an exact-match result.
            let self_lookup_target = dht
                .config
                .ipv4_node_id
                .or(dht.config.ipv6_node_id)
                .expect("validated above");
            dht.routing_table.find_node(
                self_lookup_target,
                &bootstrap,
                &dht.config,
                &mut dht.tx_manager,
                &mut dht.msg_buffer,
                &mut dht.find_node_ops,
                now,
            )?;
        }

        Ok(dht)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn on_recv(&mut self, bytes: &[u8], addr: SocketAddr) -> Result<(), error::Error> {
        self.on_recv_with_now(bytes, addr, Instant::now())
    }

    fn on_recv_with_now(
        &mut self,
        bytes: &[u8],
        addr: SocketAddr,
        now: Instant,
    ) -> Result<(), error::Error> {
        let value: Value = bt_bencode::from_slice(bytes)
            .map_err(|_| error::Error::CannotDeserializeKrpcMessage)?;
        match value.kind() {
            Some(Kind::Response) => self.on_recv_response(value, addr, now),
            Some(Kind::Error) => self.on_recv_error(value, addr, now),
            Some(Kind::Query) => self.on_recv_query(value, addr, now),
            Some(Kind::Unknown(kind)) => {
                debug!("ignoring message of unknown kind {kind} from {addr}");
                Ok(())
            }
            None => Err(error::Error::CannotDeserializeKrpcMessage),
        }
    }

    fn on_recv_response(
        &mut self,
        value: Value,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<(), error::Error> {
        let Some(tx_id_bytes) = value.tx_id().cloned() else {
            return Ok(());
        };
        let tx = match self.tx_manager.remove_checking_addr(&tx_id_bytes, addr)? {
            Some(tx) => tx,
            None => return Ok(()),
        };

        let responder_id = RespMsg::queried_node_id(&value);
        if !tx.is_node_id_match(responder_id) {
            warn!(
                "response from {addr} carried an unexpected node id for tx {:?}",
                tx.tx_id
            );
            self.tx_manager.push(tx);
            return Ok(());
        }

        let addr_id = AddrId::with_addr_and_id(addr, responder_id.or(tx.node_id));
        self.routing_table.on_msg_received(
            addr_id,
            Kind::Response,
            &self.config,
            &mut self.tx_manager,
            &mut self.msg_buffer,
            now,
        )?;

        for op in &mut self.ping_ops {
            op.handle(&tx, ops::Event::Resp(&value));
        }
        self.ping_ops.retain(|op| !op.is_done());

        for op in &mut self.find_node_ops {
            op.handle(
                &tx,
                ops::Event::Resp(&value),
                &self.config,
                &mut self.tx_manager,
                &mut self.msg_buffer,
            )?;
        }
        self.find_node_ops.retain(|op| !op.is_done());

        for op in &mut self.get_peers_ops {
            op.handle(
                &tx,
                ops::Event::Resp(&value),
                &self.config,
                &mut self.tx_manager,
                &mut self.msg_buffer,
            )?;
        }
        self.get_peers_ops.retain(|op| !op.is_done());

        self.msg_buffer.push_inbound(ReadEvent {
            addr_id,
            tx_id: Some(tx.tx_id),
            msg: msg_buffer::Msg::Resp(value),
        });
        Ok(())
    }

    fn on_recv_error(
        &mut self,
        value: Value,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<(), error::Error> {
        let Some(tx_id_bytes) = value.tx_id().cloned() else {
            return Ok(());
        };
        let tx = match self.tx_manager.remove_checking_addr(&tx_id_bytes, addr)? {
            Some(tx) => tx,
            None => return Ok(()),
        };

        let addr_id = AddrId::with_addr_and_id(tx.addr, tx.node_id);
        self.routing_table.on_msg_received(
            addr_id,
            Kind::Error,
            &self.config,
            &mut self.tx_manager,
            &mut self.msg_buffer,
            now,
        )?;

        for op in &mut self.ping_ops {
            op.handle(&tx, ops::Event::Error(&value));
        }
        self.ping_ops.retain(|op| !op.is_done());

        for op in &mut self.find_node_ops {
            op.handle(
                &tx,
                ops::Event::Error(&value),
                &self.config,
                &mut self.tx_manager,
                &mut self.msg_buffer,
            )?;
        }
        self.find_node_ops.retain(|op| !op.is_done());

        for op in &mut self.get_peers_ops {
            op.handle(
                &tx,
                ops::Event::Error(&value),
                &self.config,
                &mut self.tx_manager,
                &mut self.msg_buffer,
            )?;
        }
        self.get_peers_ops.retain(|op| !op.is_done());

        self.msg_buffer.push_inbound(ReadEvent {
            addr_id,
            tx_id: Some(tx.tx_id),
            msg: msg_buffer::Msg::Error(value),
        });
        Ok(())
    }

    /// Runs the handler registry (spec §4.8) for an inbound query, then
    /// admits the querying node into the routing table if (and only if)
    /// the handler answered it successfully and the querying node is
    /// not itself a BEP 43 read-only node. A read-only local node never
    /// answers at all.
    fn on_recv_query(
        &mut self,
        value: Value,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<(), error::Error> {
        let querying_node_id = QueryMsg::querying_node_id(&value);
        let addr_id = AddrId::with_addr_and_id(addr, querying_node_id);

        if !self.config.is_read_only_node {
            let tx_id_bytes = value.tx_id().cloned().unwrap_or_default();
            let peer_is_read_only = value.read_only();
            let handled = handler::dispatch(
                &value,
                addr,
                tx_id_bytes.as_slice(),
                &self.config,
                &self.routing_table,
                &mut self.secrets,
                &mut self.peer_store,
                &mut self.msg_buffer,
            )?;

            if handled && !peer_is_read_only {
                self.routing_table.on_msg_received(
                    addr_id,
                    Kind::Query,
                    &self.config,
                    &mut self.tx_manager,
                    &mut self.msg_buffer,
                    now,
                )?;
            }
        }

        self.msg_buffer.push_inbound(ReadEvent {
            addr_id,
            tx_id: None,
            msg: msg_buffer::Msg::Query(value),
        });
        Ok(())
    }

    /// Pops the next fully-dispatched inbound event for the host
    /// application to inspect.
    pub fn read(&mut self) -> Option<ReadEvent> {
        self.msg_buffer.pop_inbound()
    }

    /// Stages an arbitrary outbound query, registering a transaction so
    /// the eventual reply correlates back (spec §4.6). Most callers
    /// should prefer [`Self::start_ping`]/[`Self::start_find_node`]/
    /// [`Self::start_get_peers`] instead; this is the escape hatch for
    /// host-defined extension methods.
    pub fn write_query<A, T>(
        &mut self,
        args: &T,
        addr_id: AddrId<A>,
        timeout: Option<Duration>,
    ) -> Result<transaction::Id, error::Error>
    where
        T: QueryArgs,
        A: Addr + Into<SocketAddr>,
    {
        self.msg_buffer.write_query(
            args,
            addr_id,
            timeout.unwrap_or(self.config.default_query_timeout),
            self.config.client_version.as_deref(),
            self.config.is_read_only_node,
            &mut self.tx_manager,
        )
    }

    pub fn write_resp<A, T>(
        &mut self,
        tx_id_bytes: &[u8],
        resp: &T,
        addr: A,
    ) -> Result<(), error::Error>
    where
        T: RespVal,
        A: Addr + Into<SocketAddr>,
    {
        self.msg_buffer
            .write_resp(tx_id_bytes, resp, addr, None, self.config.client_version.as_deref())
    }

    pub fn write_err<A, T>(
        &mut self,
        tx_id_bytes: &[u8],
        details: &T,
        addr: A,
    ) -> Result<(), error::Error>
    where
        T: ErrorVal,
        A: Addr + Into<SocketAddr>,
    {
        self.msg_buffer
            .write_err(tx_id_bytes, details, addr, None, self.config.client_version.as_deref())
    }

    /// Fills `buf` with the next staged outbound datagram, if any.
    pub fn send_to(&mut self, mut buf: &mut [u8]) -> Result<Option<SendInfo>, error::Error> {
        if let Some(out_msg) = self.msg_buffer.pop_outbound() {
            use std::io::Write;
            buf.write_all(&out_msg.msg_data)
                .map_err(|_| error::Error::CannotSerializeKrpcMessage)?;
            Ok(Some(SendInfo {
                len: out_msg.msg_data.len(),
                addr: out_msg.addr,
            }))
        } else {
            Ok(None)
        }
    }

    /// The duration until the host should next call
    /// [`Self::on_timeout`]: whichever of the next transaction deadline,
    /// the next routing table bucket refresh, or the next token
    /// rotation comes soonest.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        [
            self.tx_manager.timeout(),
            self.routing_table.timeout(),
            Some(self.next_token_rotation),
        ]
        .into_iter()
        .flatten()
        .min()
        .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn on_timeout(&mut self) -> Result<(), error::Error> {
        self.on_timeout_with_now(Instant::now())
    }

    fn on_timeout_with_now(&mut self, now: Instant) -> Result<(), error::Error> {
        if let Some(timed_out_txs) = self.tx_manager.timed_out_txs(now) {
            for tx in timed_out_txs {
                let addr_id = AddrId::with_addr_and_id(tx.addr, tx.node_id);
                self.routing_table.on_resp_timeout(
                    addr_id,
                    &self.config,
                    &mut self.tx_manager,
                    &mut self.msg_buffer,
                    now,
                )?;

                for op in &mut self.ping_ops {
                    op.handle(&tx, ops::Event::Timeout);
                }
                self.ping_ops.retain(|op| !op.is_done());

                for op in &mut self.find_node_ops {
                    op.handle(
                        &tx,
                        ops::Event::Timeout,
                        &self.config,
                        &mut self.tx_manager,
                        &mut self.msg_buffer,
                    )?;
                }
                self.find_node_ops.retain(|op| !op.is_done());

                for op in &mut self.get_peers_ops {
                    op.handle(
                        &tx,
                        ops::Event::Timeout,
                        &self.config,
                        &mut self.tx_manager,
                        &mut self.msg_buffer,
                    )?;
                }
                self.get_peers_ops.retain(|op| !op.is_done());

                self.msg_buffer.push_inbound(ReadEvent {
                    addr_id,
                    tx_id: Some(tx.tx_id),
                    msg: msg_buffer::Msg::Timeout,
                });
            }
        }

        self.routing_table.on_timeout(
            &self.config,
            &mut self.tx_manager,
            &mut self.msg_buffer,
            &mut self.find_node_ops,
            now,
        )?;

        if now >= self.next_token_rotation {
            self.secrets.rotate()?;
            self.next_token_rotation = now + TOKEN_ROTATE_INTERVAL;
        }

        Ok(())
    }

    /// Starts a one-shot `ping` toward `addr_id` (spec §4.9).
    pub fn start_ping(&mut self, addr_id: AddrId<SocketAddr>) -> Result<(), error::Error> {
        let mut op = ops::ping::PingOp::with_addr_id(addr_id);
        op.start(&self.config, &mut self.tx_manager, &mut self.msg_buffer)?;
        self.ping_ops.push(op);
        Ok(())
    }

    /// Starts an iterative `find_node` toward `target`, seeded from
    /// both this node's own routing table and `bootstrap` (spec §4.9).
    pub fn start_find_node(
        &mut self,
        target: node::Id,
        bootstrap: Vec<AddrId<SocketAddr>>,
    ) -> Result<(), error::Error> {
        self.routing_table.find_node(
            target,
            &bootstrap,
            &self.config,
            &mut self.tx_manager,
            &mut self.msg_buffer,
            &mut self.find_node_ops,
            Instant::now(),
        )
    }

    /// Starts an iterative `get_peers` lookup for `info_hash`,
    /// optionally following up with `announce_peer` once a responder
    /// returns a token (spec §4.9).
    pub fn start_get_peers(
        &mut self,
        info_hash: torrent::InfoHash,
        bootstrap: Vec<AddrId<SocketAddr>>,
        should_announce: bool,
    ) -> Result<(), error::Error> {
        let mut op = ops::get_peers::GetPeersOp::new(info_hash, bootstrap, should_announce);
        op.start(&self.config, &mut self.tx_manager, &mut self.msg_buffer)?;
        self.get_peers_ops.push(op);
        Ok(())
    }

    /// Cancels every outstanding transaction and in-flight operation
    /// (spec §4.6/§5 `Node.cancel()`).
    pub fn cancel(&mut self) {
        self.tx_manager.cancel_all();
        self.ping_ops.clear();
        self.find_node_ops.clear();
        self.get_peers_ops.clear();
    }

    /// Nearest known IPv4 neighbors to `id`, nearest first.
    #[must_use]
    pub fn find_neighbors_ipv4(&self, id: node::Id) -> Vec<AddrId<SocketAddrV4>> {
        self.routing_table.find_neighbors_v4(id, Instant::now())
    }

    /// Nearest known IPv6 neighbors to `id`, nearest first.
    #[must_use]
    pub fn find_neighbors_ipv6(&self, id: node::Id) -> Vec<AddrId<SocketAddrV6>> {
        self.routing_table.find_neighbors_v6(id, Instant::now())
    }

    /// Total number of nodes held across the configured routing
    /// table(s), for operational status reporting (e.g. a health
    /// endpoint).
    #[must_use]
    pub fn routing_table_len(&self) -> usize {
        self.routing_table.len()
    }

    /// Number of outstanding (unanswered) transactions.
    #[must_use]
    pub fn outstanding_transaction_count(&self) -> usize {
        self.tx_manager.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc::find_node::METHOD_FIND_NODE;
    use krpc::ping::{PingQueryArgs, METHOD_PING};
    use std::convert::TryFrom;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn new_config() -> Result<Config, error::Error> {
        Ok(Config {
            ipv4_node_id: Some(node::Id::rand()?),
            ipv6_node_id: Some(node::Id::rand()?),
            client_version: None,
            default_query_timeout: Duration::from_secs(60),
            is_read_only_node: false,
            max_node_count_per_bucket: 10,
            supported_addr: SupportedAddr::Ipv4AndIpv6,
        })
    }

    fn remote_addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6532))
    }

    fn bootstrap_remote_addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881))
    }

    #[test]
    fn test_send_ping() -> Result<(), error::Error> {
        let id = node::Id::rand()?;
        let remote_addr = remote_addr();
        let addr_id = AddrId::with_addr_and_id(remote_addr, Some(id));

        let args = PingQueryArgs::with_id(id);

        let mut dht: Dht = Dht::with_config(new_config()?, std::iter::empty(), std::iter::empty())?;
        let tx_id = dht.write_query(&args, addr_id, None).unwrap();

        let mut out: [u8; 65535] = [0; 65535];
        match dht.send_to(&mut out)? {
            Some(send_info) => {
                assert_eq!(send_info.addr, remote_addr);

                let filled_buf = &out[..send_info.len];
                let msg_sent: Value = bt_bencode::from_slice(filled_buf)
                    .map_err(|_| error::Error::CannotDeserializeKrpcMessage)?;
                assert_eq!(msg_sent.kind(), Some(Kind::Query));
                assert_eq!(msg_sent.method_name_str(), Some(METHOD_PING));
                assert_eq!(msg_sent.tx_id(), Some(&tx_id.to_bytebuf()));

                Ok(())
            }
            None => panic!("expected a staged outbound ping"),
        }
    }

    #[test]
    fn test_bootstrap() -> Result<(), error::Error> {
        let bootstrap_remote_addr = bootstrap_remote_addr();
        let mut dht: Dht = Dht::with_config(
            new_config()?,
            std::iter::empty(),
            vec![AddrId::from(bootstrap_remote_addr)],
        )?;

        let mut out: [u8; 65535] = [0; 65535];
        match dht.send_to(&mut out)? {
            Some(send_info) => {
                assert_eq!(send_info.addr, bootstrap_remote_addr);

                let filled_buf = &out[..send_info.len];
                let msg_sent: Value = bt_bencode::from_slice(filled_buf)
                    .map_err(|_| error::Error::CannotDeserializeKrpcMessage)?;
                assert_eq!(msg_sent.kind(), Some(Kind::Query));
                assert_eq!(msg_sent.method_name_str(), Some(METHOD_FIND_NODE));
                let find_node_query_args =
                    krpc::find_node::FindNodeQueryArgs::try_from(msg_sent.args().unwrap()).unwrap();
                let ipv4_pivot = dht.config.ipv4_node_id.unwrap();
                assert_eq!(find_node_query_args.target(), ipv4_pivot);
                assert_eq!(find_node_query_args.id(), ipv4_pivot);

                Ok(())
            }
            None => panic!("expected a staged outbound find_node"),
        }
    }

    #[test]
    fn read_only_node_never_answers_queries() -> Result<(), error::Error> {
        let mut config = new_config()?;
        config.is_read_only_node = true;
        let mut dht = Dht::with_config(config, std::iter::empty(), std::iter::empty())?;

        let querying_id = node::Id::rand()?;
        let args = PingQueryArgs::with_id(querying_id);
        let mut dict = std::collections::BTreeMap::new();
        dict.insert(krpc::key("a"), args.to_value());
        dict.insert(
            krpc::key("q"),
            Value::ByteStr(serde_bytes::ByteBuf::from(METHOD_PING.as_bytes().to_vec())),
        );
        dict.insert(
            krpc::key("t"),
            Value::ByteStr(serde_bytes::ByteBuf::from(b"aa".to_vec())),
        );
        dict.insert(
            krpc::key("y"),
            Value::ByteStr(serde_bytes::ByteBuf::from(b"q".to_vec())),
        );
        let value = Value::Dict(dict);
        let bytes = bt_bencode::to_vec(&value).unwrap();

        dht.on_recv(&bytes, remote_addr())?;

        let mut out: [u8; 65535] = [0; 65535];
        assert!(dht.send_to(&mut out)?.is_none());
        Ok(())
    }
}

pub use node::Id as NodeId;
