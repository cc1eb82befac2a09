//! The filesystem handoff to the (external) Agent process: three files in a
//! known directory, written in an order the Agent's polling loop depends
//! on — the event log must never become visible before the payload it
//! announces.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::envelope::DecodedEnvelope;
use crate::error::RendezError;

const HASH_FILE: &str = "md5hash.txt";
const TORRENT_FILE: &str = "receivedtorrent.torrent";
const EVENTS_FILE: &str = "events.log";

/// Owns the directory C writes completed envelopes into. The Agent is the
/// sole reader; there is no locking, because the Agent's contract is to
/// tail `events.log` and only then read the other two files.
pub struct Handoff {
    dir: PathBuf,
}

impl Handoff {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `md5hash.txt`, then `receivedtorrent.torrent`, then
    /// `events.log`, each as a whole-file overwrite. `events.log` going
    /// last is load-bearing: it's the only file the Agent's tail loop
    /// watches for changes.
    pub fn write(&self, envelope: &DecodedEnvelope) -> Result<(), RendezError> {
        self.write_file(HASH_FILE, envelope.digest_hex.as_bytes())?;
        self.write_file(TORRENT_FILE, &envelope.torrent_bytes)?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.write_file(EVENTS_FILE, format!("{timestamp}\ntorrent").as_bytes())?;
        Ok(())
    }

    fn write_file(&self, name: &str, contents: &[u8]) -> Result<(), RendezError> {
        fs::write(self.dir.join(name), contents)
            .map_err(|e| RendezError::HandoffIo(format!("{name}: {e}")))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope;
    use std::fs;

    fn sample_torrent() -> Vec<u8> {
        let pieces: Vec<u8> = (0u8..20).collect();
        let mut t = Vec::new();
        t.extend_from_slice(b"d6:pieces");
        t.extend_from_slice(pieces.len().to_string().as_bytes());
        t.push(b':');
        t.extend_from_slice(&pieces);
        t.extend_from_slice(b"7:privatei0ee");
        t
    }

    #[test]
    fn writes_hash_torrent_and_event_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = sample_torrent();
        let envelope = envelope::encode(&torrent).unwrap();
        let decoded = envelope::decode(envelope.as_bytes()).unwrap();

        let handoff = Handoff::new(dir.path());
        handoff.write(&decoded).unwrap();

        let hash = fs::read_to_string(dir.path().join("md5hash.txt")).unwrap();
        let body = fs::read(dir.path().join("receivedtorrent.torrent")).unwrap();
        let events = fs::read_to_string(dir.path().join("events.log")).unwrap();

        assert_eq!(hash, format!("{:x}", md5::compute(&body)));
        assert_eq!(body, torrent);
        let mut lines = events.lines();
        assert!(lines.next().unwrap().parse::<u64>().is_ok());
        assert_eq!(lines.next(), Some("torrent"));
    }
}
