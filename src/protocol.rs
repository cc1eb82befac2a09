//! Wire message types for the two UDP conversations that pass over a
//! client's external socket: the client<->rendezvous conversation, and the
//! direct peer<->peer conversation once a session exists. Both are plain
//! ASCII, whitespace-tokenized text, where only the *leading* token is a
//! fixed tag — the remainder of a message is free-form and, for the
//! `... split ...` messages, may itself contain whitespace.

use crate::directory::PeerDirectory;
use crate::error::RendezError;

/// Splits `raw` into its leading whitespace-delimited tag and the
/// (trimmed) remainder.
fn split_tag(raw: &str) -> (&str, &str) {
    let raw = raw.trim_end_matches(['\r', '\n']);
    match raw.find(char::is_whitespace) {
        Some(idx) => (&raw[..idx], raw[idx..].trim_start()),
        None => (raw, ""),
    }
}

/// A payload that must be exactly one more whitespace-free token (an
/// address). Anything else — extra tokens, or none at all — is malformed.
fn single_token(rest: &str) -> Result<&str, RendezError> {
    let mut it = rest.split_whitespace();
    match (it.next(), it.next()) {
        (Some(tok), None) => Ok(tok),
        _ => Err(RendezError::Malformed(format!("expected one address token, got: {rest:?}"))),
    }
}

/// Splits on the first literal `" split "`, as the reference implementation
/// does, rather than by token — the second half may contain its own
/// whitespace (an envelope, a serialized peer list).
fn split_once_on(rest: &str, sep: &str) -> Result<(&str, &str), RendezError> {
    rest.split_once(sep)
        .ok_or_else(|| RendezError::Malformed(format!("expected {sep:?} separator in: {rest:?}")))
}

/// Messages a rendezvous server (R) receives from clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerInbound {
    GetInfo,
    KeepAliveProxy,
    TalkTo(String),
    RepeatTalkTo(String),
    RespondTo(String),
    ClientShutdown(String),
}

impl ServerInbound {
    pub fn parse(raw: &str) -> Result<Self, RendezError> {
        let (tag, rest) = split_tag(raw);
        match tag {
            "GetInfo" => Ok(ServerInbound::GetInfo),
            "KeepAliveProxy" => Ok(ServerInbound::KeepAliveProxy),
            "TalkTo" => Ok(ServerInbound::TalkTo(single_token(rest)?.to_string())),
            "RepeatTalkTo" => Ok(ServerInbound::RepeatTalkTo(single_token(rest)?.to_string())),
            "RespondTo" => Ok(ServerInbound::RespondTo(single_token(rest)?.to_string())),
            "ClientShutdown" => Ok(ServerInbound::ClientShutdown(single_token(rest)?.to_string())),
            other => Err(RendezError::Malformed(format!("unknown tag: {other}"))),
        }
    }
}

/// Builds the relay messages R emits: `TalkRequest`, `RepeatTalkRequest`,
/// `TalkResponse`, each of the shape `"<Tag> <sender-addr>"`.
pub fn relay_message(tag: &str, sender_addr: &str) -> String {
    format!("{tag} {sender_addr}")
}

pub fn keepalive_proxy_reply() -> String {
    "KeepAliveProxy ... ".to_string()
}

pub fn keepalive_proxy_update(dir: &PeerDirectory) -> String {
    format!("KeepAliveProxy peerupdate {dir}")
}

/// Messages that arrive on a client's external socket, either relayed by R
/// (`KeepAliveProxy peerupdate`, `TalkRequest`, `RepeatTalkRequest`,
/// `TalkResponse`) or sent directly by a session peer (everything else).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSocketMessage {
    KeepAliveProxyUpdate(PeerDirectory),
    KeepAlivePeer(String),
    TalkRequest(String),
    RepeatTalkRequest(String),
    TalkResponse(String),
    SessionStart(String),
    PeerLeave(String),
    SharePeers(PeerDirectory),
    SendTorrentFile { origin: String, envelope: String },
}

impl PeerSocketMessage {
    pub fn parse(raw: &str) -> Result<Self, RendezError> {
        let (tag, rest) = split_tag(raw);
        match tag {
            "KeepAliveProxy" => {
                let (_, dir_text) = split_once_on(rest, "peerupdate ")
                    .map_err(|_| RendezError::Malformed("KeepAliveProxy without peerupdate".into()))?;
                Ok(PeerSocketMessage::KeepAliveProxyUpdate(PeerDirectory::parse(dir_text)?))
            }
            "KeepAlivePeer" => Ok(PeerSocketMessage::KeepAlivePeer(single_token(rest)?.to_string())),
            "TalkRequest" => Ok(PeerSocketMessage::TalkRequest(single_token(rest)?.to_string())),
            "RepeatTalkRequest" => {
                Ok(PeerSocketMessage::RepeatTalkRequest(single_token(rest)?.to_string()))
            }
            "TalkResponse" => Ok(PeerSocketMessage::TalkResponse(single_token(rest)?.to_string())),
            "SessionStart" => Ok(PeerSocketMessage::SessionStart(single_token(rest)?.to_string())),
            "PeerLeave" => Ok(PeerSocketMessage::PeerLeave(single_token(rest)?.to_string())),
            "SharePeers" => {
                let (_, list_text) = split_once_on(rest, "split ")?;
                Ok(PeerSocketMessage::SharePeers(PeerDirectory::parse(list_text)?))
            }
            "SendTorrentFile" => {
                let (origin, envelope_text) = split_once_on(rest, " split ")?;
                Ok(PeerSocketMessage::SendTorrentFile {
                    origin: origin.trim().to_string(),
                    envelope: envelope_text.to_string(),
                })
            }
            other => Err(RendezError::Malformed(format!("unknown tag: {other}"))),
        }
    }
}

pub fn session_start(own_addr: &str) -> String {
    format!("SessionStart {own_addr}")
}

pub fn peer_leave(own_addr: &str) -> String {
    format!("PeerLeave {own_addr}")
}

pub fn keepalive_peer(own_addr: &str) -> String {
    format!("KeepAlivePeer {own_addr} ... ")
}

pub fn share_peers(session_peers: &PeerDirectory) -> String {
    format!("SharePeers split {session_peers}")
}

pub fn send_torrent_file(own_addr: &str, envelope: &str) -> String {
    format!("SendTorrentFile {own_addr} split {envelope}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_inbound_tags() {
        assert_eq!(ServerInbound::parse("GetInfo").unwrap(), ServerInbound::GetInfo);
        assert_eq!(
            ServerInbound::parse("TalkTo 203.0.113.2").unwrap(),
            ServerInbound::TalkTo("203.0.113.2".into())
        );
        assert_eq!(
            ServerInbound::parse("ClientShutdown 203.0.113.1").unwrap(),
            ServerInbound::ClientShutdown("203.0.113.1".into())
        );
        assert!(ServerInbound::parse("Nonsense").is_err());
        assert!(ServerInbound::parse("TalkTo").is_err());
        assert!(ServerInbound::parse("TalkTo a b").is_err());
    }

    #[test]
    fn parses_peer_socket_messages() {
        assert_eq!(
            PeerSocketMessage::parse("TalkResponse 203.0.113.2").unwrap(),
            PeerSocketMessage::TalkResponse("203.0.113.2".into())
        );

        let mut dir = PeerDirectory::new();
        dir.insert("203.0.113.3", 6000);
        let msg = format!("KeepAliveProxy peerupdate {dir}");
        assert_eq!(
            PeerSocketMessage::parse(&msg).unwrap(),
            PeerSocketMessage::KeepAliveProxyUpdate(dir)
        );
    }

    #[test]
    fn parses_send_torrent_file_with_embedded_spaces_in_envelope() {
        let msg = "SendTorrentFile 203.0.113.1 split AAAA BBBB CCCC";
        let parsed = PeerSocketMessage::parse(msg).unwrap();
        match parsed {
            PeerSocketMessage::SendTorrentFile { origin, envelope } => {
                assert_eq!(origin, "203.0.113.1");
                assert_eq!(envelope, "AAAA BBBB CCCC");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
