//! The rendezvous server (R): a single-threaded request/relay loop holding
//! no per-session state beyond the peer directory.
//!
//! R never stores a port that arrives inside a message body — only the
//! port a sender's own prior `GetInfo` datagram revealed via `recv_from`
//! survives NAT translation back to that sender, so that's the only port R
//! ever uses to reach a peer.

use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::directory::PeerDirectory;
use crate::error::RendezResult;
use crate::protocol::{self, ServerInbound};

const RECV_BUF_SIZE: usize = 4096;

pub struct Server {
    socket: UdpSocket,
    directory: PeerDirectory,
}

impl Server {
    pub fn bind(host: &str, port: u16) -> RendezResult<Self> {
        let socket = UdpSocket::bind((host, port))?;
        log::info!("rendezvous server listening on {host}:{port}");
        Ok(Self {
            socket,
            directory: PeerDirectory::new(),
        })
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Runs the dispatcher forever. A receive failure on the main socket is
    /// fatal, per the error taxonomy — it propagates out rather than being
    /// logged and retried.
    pub fn run(&mut self) -> RendezResult<()> {
        loop {
            self.tick()?;
        }
    }

    fn tick(&mut self) -> RendezResult<()> {
        let mut buf = [0u8; RECV_BUF_SIZE];
        let (len, src) = self.socket.recv_from(&mut buf)?;
        let raw = String::from_utf8_lossy(&buf[..len]).into_owned();

        match ServerInbound::parse(&raw) {
            Ok(msg) => self.handle(msg, src),
            Err(e) => log::warn!("dropping malformed datagram from {src}: {e}"),
        }
        Ok(())
    }

    fn handle(&mut self, msg: ServerInbound, src: SocketAddr) {
        match msg {
            ServerInbound::GetInfo => self.handle_get_info(src),
            ServerInbound::KeepAliveProxy => self.handle_keepalive(src),
            ServerInbound::TalkTo(target) => self.handle_talk_to(src, &target, "TalkRequest"),
            ServerInbound::RepeatTalkTo(target) => {
                self.handle_talk_to(src, &target, "RepeatTalkRequest")
            }
            ServerInbound::RespondTo(target) => self.handle_respond_to(src, &target),
            ServerInbound::ClientShutdown(addr) => {
                self.directory.remove(&addr);
                log::info!("removed {addr} from directory on ClientShutdown");
            }
        }
    }

    fn handle_get_info(&mut self, src: SocketAddr) {
        let addr = src.ip().to_string();
        let port = src.port();
        self.directory.insert(addr.clone(), port);

        // The directory handed back to the sender omits its own entry,
        // which was only just inserted and is of no use as a candidate to
        // itself.
        let mut visible = self.directory.clone();
        visible.remove(&addr);

        self.send(src, "Message received\n");
        self.send(src, &addr);
        self.send(src, &port.to_string());
        self.send(src, &visible.to_string());
        self.send(src, &protocol::keepalive_proxy_reply());
    }

    fn handle_keepalive(&mut self, src: SocketAddr) {
        self.send(src, &protocol::keepalive_proxy_update(&self.directory));
    }

    fn handle_talk_to(&mut self, src: SocketAddr, target: &str, relay_tag: &str) {
        let Some(port) = self.directory.get(target) else {
            log::warn!("{relay_tag} target {target} unknown to directory, dropping");
            return;
        };
        let Some(target_addr) = resolve(target, port) else {
            log::warn!("directory entry for {target} is not a valid address, dropping");
            return;
        };
        let sender_addr = src.ip().to_string();
        self.send(target_addr, &protocol::relay_message(relay_tag, &sender_addr));
    }

    fn handle_respond_to(&mut self, src: SocketAddr, target: &str) {
        let Some(port) = self.directory.get(target) else {
            log::warn!("RespondTo target {target} unknown to directory, dropping");
            return;
        };
        let Some(target_addr) = resolve(target, port) else {
            log::warn!("directory entry for {target} is not a valid address, dropping");
            return;
        };
        let sender_addr = src.ip().to_string();
        self.send(target_addr, &protocol::relay_message("TalkResponse", &sender_addr));
    }

    fn send(&self, to: SocketAddr, payload: &str) {
        if let Err(e) = self.socket.send_to(payload.as_bytes(), to) {
            log::error!("send to {to} failed: {e}");
        }
    }
}

fn resolve(addr: &str, port: u16) -> Option<SocketAddr> {
    addr.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;
    use std::time::Duration;

    fn local_socket() -> StdUdpSocket {
        let s = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        s.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        s
    }

    #[test]
    fn get_info_registers_sender_and_replies_with_empty_directory_first_time() {
        let mut server = Server::bind("127.0.0.1", 0).unwrap();
        let server_addr = server.socket.local_addr().unwrap();
        let client = local_socket();

        client.send_to(b"GetInfo hello", server_addr).unwrap();
        server.tick().unwrap();

        let mut buf = [0u8; 4096];
        let mut lines = Vec::new();
        for _ in 0..5 {
            let (len, _) = client.recv_from(&mut buf).unwrap();
            lines.push(String::from_utf8_lossy(&buf[..len]).into_owned());
        }

        assert_eq!(lines[1], "127.0.0.1");
        assert_eq!(lines[3], "[]");
        assert!(lines[4].starts_with("KeepAliveProxy"));
        assert!(server.directory().contains("127.0.0.1"));
    }

    #[test]
    fn talk_to_unknown_target_is_dropped_silently() {
        let mut server = Server::bind("127.0.0.1", 0).unwrap();
        let server_addr = server.socket.local_addr().unwrap();
        let client = local_socket();

        client.send_to(b"TalkTo 203.0.113.9", server_addr).unwrap();
        server.tick().unwrap();
        // no crash, no relay sent anywhere observable from this test
    }

    #[test]
    fn talk_to_known_target_relays_talk_request() {
        let mut server = Server::bind("127.0.0.1", 0).unwrap();
        let server_addr = server.socket.local_addr().unwrap();

        let peer_b = local_socket();
        let peer_b_addr = peer_b.local_addr().unwrap();
        server.directory.insert(peer_b_addr.ip().to_string(), peer_b_addr.port());

        let peer_a = local_socket();
        let msg = format!("TalkTo {}", peer_b_addr.ip());
        peer_a.send_to(msg.as_bytes(), server_addr).unwrap();
        server.tick().unwrap();

        let mut buf = [0u8; 4096];
        let (len, _) = peer_b.recv_from(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..len]);
        assert!(received.starts_with("TalkRequest "));
    }

    #[test]
    fn client_shutdown_removes_from_directory() {
        let mut server = Server::bind("127.0.0.1", 0).unwrap();
        server.directory.insert("198.51.100.1", 9000);
        server.handle(ServerInbound::ClientShutdown("198.51.100.1".to_string()), "127.0.0.1:1".parse().unwrap());
        assert!(!server.directory().contains("198.51.100.1"));
    }
}
