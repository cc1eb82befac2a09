//! The peer client (C): the bulk of the core. A single-threaded reactive
//! loop alternating a blocking read of the external socket (R or a session
//! peer) with a non-blocking drain of the local control socket (the
//! Agent).
//!
//! Per-peer state is never stored as an explicit enum — it's derived on
//! demand from which of the three maps an address appears in. See
//! [`Client::state_of`].

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::control::LocalCommand;
use crate::directory::PeerDirectory;
use crate::envelope;
use crate::error::{RendezError, RendezResult};
use crate::handoff::Handoff;
use crate::protocol::{self, PeerSocketMessage};

const RECV_BUF_SIZE: usize = 4096;
const MAX_RETRANSMIT: u8 = 2;
const KEEPALIVE_THROTTLE: Duration = Duration::from_secs(2);

/// A read-only view of where an address currently sits; never stored, only
/// computed from `session_peers` / `retransmit` / `directory` membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unknown,
    Candidate,
    SessionPending,
    InSession,
}

pub struct Client {
    external: UdpSocket,
    control: UdpSocket,
    server_addr: SocketAddr,
    own_addr: String,
    own_port: u16,
    directory: PeerDirectory,
    session_peers: PeerDirectory,
    retransmit: HashMap<String, u8>,
    proxycontact: bool,
    handoff: Handoff,
    should_exit: bool,
}

impl Client {
    /// Binds the external socket (OS-assigned port, blocking) and the local
    /// control socket (loopback, fixed port, non-blocking). Does not talk to
    /// R yet — call [`Client::bootstrap`] for that.
    pub fn bind(
        server_addr: SocketAddr,
        own_addr_hint: impl Into<String>,
        control_port: u16,
        handoff_dir: impl Into<PathBuf>,
    ) -> RendezResult<Self> {
        let external = UdpSocket::bind("0.0.0.0:0")?;
        let control = UdpSocket::bind(("127.0.0.1", control_port))?;
        control.set_nonblocking(true)?;

        Ok(Self {
            external,
            control,
            server_addr,
            own_addr: own_addr_hint.into(),
            own_port: 0,
            directory: PeerDirectory::new(),
            session_peers: PeerDirectory::new(),
            retransmit: HashMap::new(),
            proxycontact: true,
            handoff: Handoff::new(handoff_dir),
            should_exit: false,
        })
    }

    pub fn own_addr(&self) -> &str {
        &self.own_addr
    }

    pub fn session_peers(&self) -> &PeerDirectory {
        &self.session_peers
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn retransmit_count(&self, addr: &str) -> u8 {
        self.retransmit.get(addr).copied().unwrap_or(0)
    }

    pub fn sessionlink(&self) -> bool {
        !self.session_peers.is_empty()
    }

    pub fn state_of(&self, addr: &str) -> PeerState {
        if self.session_peers.contains(addr) {
            PeerState::InSession
        } else if self.retransmit.contains_key(addr) {
            PeerState::SessionPending
        } else if self.directory.contains(addr) {
            PeerState::Candidate
        } else {
            PeerState::Unknown
        }
    }

    /// The five-datagram GetInfo exchange: send the request, then read the
    /// acknowledgement, observed address, observed port, the current
    /// directory, and the opening `KeepAliveProxy` in that fixed order.
    pub fn bootstrap(&mut self) -> RendezResult<()> {
        self.external.send_to(b"GetInfo hello", self.server_addr)?;

        let mut buf = [0u8; RECV_BUF_SIZE];
        let _ack = recv_line(&self.external, &mut buf)?;
        let own_addr = recv_line(&self.external, &mut buf)?;
        let own_port_line = recv_line(&self.external, &mut buf)?;
        let directory_line = recv_line(&self.external, &mut buf)?;
        let _keepalive_ack = recv_line(&self.external, &mut buf)?;

        let own_port: u16 = own_port_line
            .parse()
            .map_err(|_| RendezError::Malformed(format!("bad port in GetInfo reply: {own_port_line}")))?;

        self.own_addr = own_addr;
        self.own_port = own_port;
        self.directory = PeerDirectory::parse(&directory_line)?;
        log::info!("bootstrapped as {}:{}", self.own_addr, self.own_port);
        Ok(())
    }

    /// Runs forever: one external message, then a full drain of the local
    /// control socket, repeated until a local `ExitScript` sets the exit
    /// flag. A receive failure on the external socket is fatal.
    pub fn run(&mut self) -> RendezResult<()> {
        while !self.should_exit {
            self.handle_one_external_message()?;
            self.drain_control_socket();
        }
        Ok(())
    }

    fn handle_one_external_message(&mut self) -> RendezResult<()> {
        let mut buf = [0u8; RECV_BUF_SIZE];
        let (len, src) = self.external.recv_from(&mut buf)?;
        let raw = String::from_utf8_lossy(&buf[..len]).into_owned();

        match PeerSocketMessage::parse(&raw) {
            Ok(msg) => self.handle_peer_message(msg, src),
            Err(e) => log::warn!("dropping malformed datagram from {src}: {e}"),
        }
        Ok(())
    }

    fn drain_control_socket(&mut self) {
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            match self.control.recv_from(&mut buf) {
                Ok((len, _src)) => {
                    let raw = String::from_utf8_lossy(&buf[..len]).into_owned();
                    match LocalCommand::parse(&raw) {
                        Ok(cmd) => self.handle_local_command(cmd),
                        Err(e) => log::warn!("dropping malformed local command: {e}"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("local control socket read failed: {e}");
                    break;
                }
            }
        }
    }

    fn handle_peer_message(&mut self, msg: PeerSocketMessage, src: SocketAddr) {
        match msg {
            PeerSocketMessage::KeepAliveProxyUpdate(dir) => {
                if self.proxycontact {
                    self.directory.merge(&dir);
                    self.send_to(src, &protocol::keepalive_proxy_reply());
                    thread::sleep(KEEPALIVE_THROTTLE);
                }
            }
            PeerSocketMessage::KeepAlivePeer(addr) => {
                if self.sessionlink() {
                    match self.peer_socket(&addr) {
                        Some(target) => {
                            self.send_to(target, &protocol::keepalive_peer(&self.own_addr));
                            thread::sleep(KEEPALIVE_THROTTLE);
                        }
                        None => log::warn!("KeepAlivePeer from {addr} not in SessionPeers, dropping"),
                    }
                }
            }
            PeerSocketMessage::TalkRequest(addr) => self.handle_talk_request(&addr, false),
            PeerSocketMessage::RepeatTalkRequest(addr) => self.handle_talk_request(&addr, true),
            PeerSocketMessage::TalkResponse(addr) => {
                let port = self.resolve_port(&addr, src);
                self.session_peers.insert(addr.clone(), port);
                if let Some(target) = self.peer_socket(&addr) {
                    self.send_to(target, &protocol::session_start(&self.own_addr));
                }
            }
            PeerSocketMessage::SessionStart(addr) => {
                let port = self.resolve_port(&addr, src);
                self.session_peers.insert(addr.clone(), port);
                if let Some(target) = self.peer_socket(&addr) {
                    if self.session_peers.len() > 1 {
                        self.send_to(target, &protocol::share_peers(&self.session_peers));
                    }
                    self.send_to(target, &protocol::keepalive_peer(&self.own_addr));
                }
            }
            PeerSocketMessage::PeerLeave(addr) => {
                if self.sessionlink() {
                    self.session_peers.remove(&addr);
                    self.retransmit.remove(&addr);
                }
            }
            PeerSocketMessage::SharePeers(list) => {
                for (addr, port) in list.iter() {
                    if addr == self.own_addr || self.session_peers.contains(addr) {
                        continue;
                    }
                    self.directory.insert(addr.to_string(), port);
                    self.initiate_talk_to(addr);
                }
            }
            PeerSocketMessage::SendTorrentFile { origin, envelope } => {
                self.handle_send_torrent_file(&origin, &envelope);
            }
        }
    }

    /// The shared NAT-punching rule: while under budget, answer a
    /// `TalkRequest`/`RepeatTalkRequest` with *both* a `RespondTo` and a
    /// `TalkTo` back at R, so both sides have sent an outbound packet
    /// toward each other at least once.
    fn handle_talk_request(&mut self, addr: &str, reset: bool) {
        if reset {
            self.retransmit.insert(addr.to_string(), 0);
        }
        let counter = *self.retransmit.entry(addr.to_string()).or_insert(0);
        if counter >= MAX_RETRANSMIT {
            log::warn!("retransmit budget exhausted for {addr}, giving up on handshake");
            return;
        }
        self.send_to_server(&format!("RespondTo {addr}"));
        self.send_to_server(&format!("TalkTo {addr}"));
        self.retransmit.insert(addr.to_string(), counter + 1);
    }

    /// The counter-gated `TalkTo`/`RepeatTalkTo` forward used by both the
    /// local `TalkTo` command and SharePeers-triggered outreach: the first
    /// attempt for an address is a plain `TalkTo`; any later attempt resets
    /// the counter and is wrapped as `RepeatTalkTo`.
    fn initiate_talk_to(&mut self, addr: &str) {
        let repeat = self.retransmit.contains_key(addr);
        self.retransmit.insert(addr.to_string(), 0);
        if repeat {
            self.send_to_server(&format!("RepeatTalkTo {addr}"));
        } else {
            self.send_to_server(&format!("TalkTo {addr}"));
        }
    }

    fn handle_send_torrent_file(&self, origin: &str, envelope: &str) {
        match envelope::decode(envelope.as_bytes()) {
            Ok(decoded) => {
                if let Err(e) = self.handoff.write(&decoded) {
                    log::error!("agent handoff write failed for torrent from {origin}: {e}");
                }
            }
            Err(e) => log::warn!("dropping unparseable envelope from {origin}: {e}"),
        }
    }

    fn handle_local_command(&mut self, cmd: LocalCommand) {
        match cmd {
            LocalCommand::SendTorrent(payload) => {
                let peers: Vec<(String, u16)> =
                    self.session_peers.iter().map(|(a, p)| (a.to_string(), p)).collect();
                for (addr, port) in peers {
                    if let Some(target) = socket_for(&addr, port) {
                        self.send_to(target, &protocol::send_torrent_file(&self.own_addr, &payload));
                    }
                }
            }
            LocalCommand::EndSession => self.end_session(),
            LocalCommand::TalkTo(addr) => self.initiate_talk_to(&addr),
            LocalCommand::ExitScript => {
                if self.sessionlink() {
                    self.end_session();
                }
                self.send_to_server(&format!("ClientShutdown {}", self.own_addr));
                self.should_exit = true;
            }
        }
    }

    fn end_session(&mut self) {
        let peers: Vec<(String, u16)> =
            self.session_peers.iter().map(|(a, p)| (a.to_string(), p)).collect();
        for (addr, port) in &peers {
            if let Some(target) = socket_for(addr, *port) {
                self.send_to(target, &protocol::peer_leave(&self.own_addr));
            }
        }
        self.session_peers = PeerDirectory::new();
    }

    /// Prefers the port R reported for `addr`; falls back to the port the
    /// datagram that just taught us about `addr` actually arrived from.
    fn resolve_port(&self, addr: &str, src: SocketAddr) -> u16 {
        self.directory.get(addr).unwrap_or_else(|| src.port())
    }

    fn peer_socket(&self, addr: &str) -> Option<SocketAddr> {
        let port = self.session_peers.get(addr).or_else(|| self.directory.get(addr))?;
        socket_for(addr, port)
    }

    fn send_to(&self, to: SocketAddr, payload: &str) {
        if let Err(e) = self.external.send_to(payload.as_bytes(), to) {
            log::error!("send to {to} failed: {e}");
        }
    }

    fn send_to_server(&self, payload: &str) {
        self.send_to(self.server_addr, payload);
    }
}

fn socket_for(addr: &str, port: u16) -> Option<SocketAddr> {
    addr.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, port))
}

fn recv_line(socket: &UdpSocket, buf: &mut [u8]) -> RendezResult<String> {
    let (len, _src) = socket.recv_from(buf)?;
    Ok(String::from_utf8_lossy(&buf[..len])
        .trim_end_matches(['\r', '\n'])
        .to_string())
}
