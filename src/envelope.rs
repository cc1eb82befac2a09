//! The torrent-metadata envelope: an MD5 digest prefixed onto a torrent
//! file whose binary `pieces` field has been base64-wrapped so the whole
//! thing survives a UDP datagram as printable ASCII.
//!
//! This deliberately does not go through a bencode deserializer. Per the
//! wire format, the decimal length in front of `pieces` is left stale after
//! wrapping: the declared byte count no longer matches the re-encoded span,
//! so a strict bencode parser would reject the envelope outright. Receivers
//! instead find the end of the wrapped span with the literal `:private`
//! sentinel, exactly as the reference `torrentformat.py` does.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::RendezError;

const PIECES_FIELD: &[u8] = b"pieces";
const PRIVATE_SENTINEL: &[u8] = b":private";
const DIGEST_HEX_LEN: usize = 32;

/// An envelope ready to be handed to a peer as the payload of a
/// `SendTorrentFile ... split <envelope>` message.
pub struct Envelope {
    bytes: Vec<u8>,
}

impl Envelope {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_string(self) -> Result<String, RendezError> {
        String::from_utf8(self.bytes)
            .map_err(|e| RendezError::EnvelopeDecode(format!("non-utf8 envelope: {e}")))
    }
}

/// The result of destructuring an envelope on the receiving side, ready to
/// be written to the agent handoff files.
pub struct DecodedEnvelope {
    pub digest_hex: String,
    pub torrent_bytes: Vec<u8>,
}

/// Builds an envelope from the original (pre-wrapping) bytes of a `.torrent`
/// file: MD5 over the original bytes, then base64-wrap the `pieces` span in
/// place without touching its declared length.
pub fn encode(original: &[u8]) -> Result<Envelope, RendezError> {
    let digest = md5::compute(original);
    let digest_hex = format!("{digest:x}");

    let pieces_at = find_subslice(original, PIECES_FIELD)
        .ok_or_else(|| RendezError::EnvelopeDecode("no 'pieces' field in torrent".into()))?;
    let digits_start = pieces_at + PIECES_FIELD.len();
    let (_len, colon_at) = parse_decimal_length(original, digits_start)?;
    let span_start = colon_at + 1;

    // Wrap up to the `:private` sentinel, not just the declared length: the
    // reference leaves the byte(s) between the piece hashes and `:private`
    // (the bencode length-prefix digit of the `private` key) un-wrapped by
    // declared length but still inside the base64 span, so decode's
    // sentinel-driven span search lands on pure base64.
    let span_end = find_subslice(&original[span_start..], PRIVATE_SENTINEL)
        .map(|offset| span_start + offset)
        .ok_or_else(|| RendezError::EnvelopeDecode("no ':private' sentinel in torrent".into()))?;

    let mut body = Vec::with_capacity(original.len() + (span_end - span_start));
    body.extend_from_slice(&original[..span_start]);
    body.extend_from_slice(STANDARD.encode(&original[span_start..span_end]).as_bytes());
    body.extend_from_slice(&original[span_end..]);

    let mut bytes = Vec::with_capacity(DIGEST_HEX_LEN + body.len());
    bytes.extend_from_slice(digest_hex.as_bytes());
    bytes.extend_from_slice(&body);

    Ok(Envelope { bytes })
}

/// Reverses [`encode`]: strips the digest prefix, base64-decodes the
/// `pieces` span (located via the `:private` sentinel, since the length
/// prefix is stale), and verifies the digest against the reconstructed
/// bytes before handing them back.
pub fn decode(envelope: &[u8]) -> Result<DecodedEnvelope, RendezError> {
    if envelope.len() < DIGEST_HEX_LEN {
        return Err(RendezError::EnvelopeDecode("envelope shorter than digest".into()));
    }
    let (digest_prefix, remainder) = envelope.split_at(DIGEST_HEX_LEN);
    let digest_hex = std::str::from_utf8(digest_prefix)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(|| RendezError::EnvelopeDecode("malformed MD5 prefix".into()))?
        .to_lowercase();

    let pieces_at = find_subslice(remainder, PIECES_FIELD)
        .ok_or_else(|| RendezError::EnvelopeDecode("no 'pieces' field in envelope".into()))?;
    let digits_start = pieces_at + PIECES_FIELD.len();
    let (_stale_len, colon_at) = parse_decimal_length(remainder, digits_start)?;
    let span_start = colon_at + 1;

    let span_end = find_subslice(&remainder[span_start..], PRIVATE_SENTINEL)
        .map(|offset| span_start + offset)
        .ok_or_else(|| RendezError::EnvelopeDecode("no ':private' sentinel in envelope".into()))?;

    let decoded_piece_bytes = STANDARD
        .decode(&remainder[span_start..span_end])
        .map_err(|e| RendezError::EnvelopeDecode(format!("bad base64 in pieces field: {e}")))?;

    let mut torrent_bytes = Vec::with_capacity(remainder.len());
    torrent_bytes.extend_from_slice(&remainder[..span_start]);
    torrent_bytes.extend_from_slice(&decoded_piece_bytes);
    torrent_bytes.extend_from_slice(&remainder[span_end..]);

    let recomputed = format!("{:x}", md5::compute(&torrent_bytes));
    if recomputed != digest_hex {
        return Err(RendezError::EnvelopeDecode(format!(
            "digest mismatch: envelope claims {digest_hex}, reconstructed body hashes to {recomputed}"
        )));
    }

    Ok(DecodedEnvelope {
        digest_hex,
        torrent_bytes,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reads the decimal length that follows `pieces` up to (and including) the
/// `:` separator. Returns the parsed length and the index of the `:`.
fn parse_decimal_length(buf: &[u8], start: usize) -> Result<(usize, usize), RendezError> {
    let mut end = start;
    while buf.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if end == start || buf.get(end) != Some(&b':') {
        return Err(RendezError::EnvelopeDecode(
            "missing decimal length/':' after 'pieces'".into(),
        ));
    }
    let len: usize = std::str::from_utf8(&buf[start..end])
        .unwrap()
        .parse()
        .map_err(|_| RendezError::EnvelopeDecode("pieces length overflow".into()))?;
    Ok((len, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_torrent(pieces: &[u8]) -> Vec<u8> {
        let mut t = Vec::new();
        t.extend_from_slice(b"d8:announce20:http://tracker.test/4:infod6:lengthi342e4:name9:debian.iso12:piece lengthi16384e6:pieces");
        t.extend_from_slice(pieces.len().to_string().as_bytes());
        t.push(b':');
        t.extend_from_slice(pieces);
        t.extend_from_slice(b"7:privatei0eee");
        t
    }

    #[test]
    fn round_trips_a_torrent_with_private_sentinel() {
        let pieces: Vec<u8> = (0u8..20).collect();
        let torrent = sample_torrent(&pieces);

        let envelope = encode(&torrent).unwrap();
        let decoded = decode(envelope.as_bytes()).unwrap();

        assert_eq!(decoded.torrent_bytes, torrent);
        assert_eq!(decoded.digest_hex, format!("{:x}", md5::compute(&torrent)));
    }

    #[test]
    fn digest_is_32_lowercase_hex_chars() {
        let torrent = sample_torrent(&[0xAB; 20]);
        let envelope = encode(&torrent).unwrap();
        let s = envelope.into_string().unwrap();
        let digest = &s[..32];
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn rejects_torrent_without_pieces_field() {
        assert!(encode(b"d4:name3:foo e").is_err());
    }

    #[test]
    fn rejects_envelope_without_private_sentinel() {
        let torrent = sample_torrent(&[0u8; 20]);
        let envelope = encode(&torrent).unwrap();
        let mut bytes = envelope.into_string().unwrap().into_bytes();
        let cut = bytes.len() - 12;
        bytes.truncate(cut);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_tampered_digest() {
        let torrent = sample_torrent(&[1u8; 20]);
        let envelope = encode(&torrent).unwrap();
        let mut bytes = envelope.into_string().unwrap().into_bytes();
        bytes[0] = if bytes[0] == b'0' { b'1' } else { b'0' };
        assert!(decode(&bytes).is_err());
    }
}
