//! The local control channel: commands a separate Agent process (or, for
//! testing and manual driving, `rendezctl`) sends to a running client's
//! loopback socket.

use crate::error::RendezError;

pub const DEFAULT_CONTROL_PORT: u16 = 5044;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    SendTorrent(String),
    EndSession,
    TalkTo(String),
    ExitScript,
}

impl LocalCommand {
    pub fn parse(raw: &str) -> Result<Self, RendezError> {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let (tag, rest) = match raw.find(char::is_whitespace) {
            Some(idx) => (&raw[..idx], raw[idx..].trim_start()),
            None => (raw, ""),
        };
        match tag {
            "SendTorrent" => {
                if rest.is_empty() {
                    return Err(RendezError::Malformed("SendTorrent with no envelope".into()));
                }
                Ok(LocalCommand::SendTorrent(rest.to_string()))
            }
            "EndSession" => Ok(LocalCommand::EndSession),
            "TalkTo" => {
                let mut it = rest.split_whitespace();
                match (it.next(), it.next()) {
                    (Some(addr), None) => Ok(LocalCommand::TalkTo(addr.to_string())),
                    _ => Err(RendezError::Malformed(format!("TalkTo expects one address, got: {rest:?}"))),
                }
            }
            "ExitScript" => Ok(LocalCommand::ExitScript),
            other => Err(RendezError::Malformed(format!("unknown local command: {other}"))),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            LocalCommand::SendTorrent(envelope) => format!("SendTorrent {envelope}"),
            LocalCommand::EndSession => "EndSession".to_string(),
            LocalCommand::TalkTo(addr) => format!("TalkTo {addr}"),
            LocalCommand::ExitScript => "ExitScript".to_string(),
        }
    }
}
