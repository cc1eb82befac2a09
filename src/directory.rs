//! The peer directory: R's authoritative address -> port map, serialized
//! onto the wire as `[["addr", port], ...]` and cached by each C.
//!
//! The reference implementation built this list with Python's `str()` on a
//! list of pairs and parsed it back with `ast.literal_eval`. Per design note
//! "Dictionary parsing via literal evaluation", that permissive evaluator is
//! replaced here with a strict grammar: malformed input is a parse error,
//! not a generic exception to swallow.

use std::collections::BTreeMap;
use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{map, map_res};
use nom::multi::separated_list0;
use nom::sequence::{delimited, separated_pair};
use nom::IResult;

use crate::error::RendezError;

/// R's authoritative mapping from external address to external port.
/// Kept in a `BTreeMap` (rather than the reference's unordered dict) so
/// serialization is deterministic and tests aren't order-flaky.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDirectory(BTreeMap<String, u16>);

impl PeerDirectory {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_entries(entries: Vec<(String, u16)>) -> Self {
        Self(entries.into_iter().collect())
    }

    pub fn insert(&mut self, addr: impl Into<String>, port: u16) {
        self.0.insert(addr.into(), port);
    }

    pub fn remove(&mut self, addr: &str) {
        self.0.remove(addr);
    }

    pub fn get(&self, addr: &str) -> Option<u16> {
        self.0.get(addr).copied()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.0.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.0.iter().map(|(addr, port)| (addr.as_str(), *port))
    }

    /// Merges another directory's entries into this one, overwriting on
    /// conflict. Used by C when it folds a `KeepAliveProxy peerupdate`
    /// directory into its cached `peercandidates`.
    pub fn merge(&mut self, other: &PeerDirectory) {
        for (addr, port) in other.iter() {
            self.insert(addr.to_string(), port);
        }
    }

    pub fn parse(input: &str) -> Result<Self, RendezError> {
        parse_pair_list(input.trim())
            .map(|(_, entries)| Self::from_entries(entries))
            .map_err(|_| RendezError::Malformed(format!("bad peer directory: {input}")))
    }
}

impl fmt::Display for PeerDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (addr, port)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[\"{addr}\", {port}]")?;
        }
        write!(f, "]")
    }
}

fn ws<'a, F, O>(mut inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    move |input: &'a str| {
        let (input, _) = multispace0(input)?;
        let (input, out) = inner(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, out))
    }
}

fn parse_quoted_addr(input: &str) -> IResult<&str, String> {
    let empty = map(alt((tag("\"\""), tag("''"))), |_: &str| String::new());
    let nonempty = map(
        alt((
            delimited(char('"'), is_not("\""), char('"')),
            delimited(char('\''), is_not("'"), char('\'')),
        )),
        |s: &str| s.to_string(),
    );
    alt((empty, nonempty))(input)
}

fn parse_port(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |s: &str| s.parse::<u16>())(input)
}

fn parse_pair(input: &str) -> IResult<&str, (String, u16)> {
    delimited(
        ws(char('[')),
        separated_pair(parse_quoted_addr, ws(char(',')), parse_port),
        ws(char(']')),
    )(input)
}

/// Parses `[[addr, port], ...]`, requiring the *entire* trimmed input to be
/// consumed by the grammar — a trailing garbage byte is a parse failure,
/// not a value to ignore.
fn parse_pair_list(input: &str) -> IResult<&str, Vec<(String, u16)>> {
    let (rest, entries) = delimited(
        ws(char('[')),
        separated_list0(ws(char(',')), parse_pair),
        ws(char(']')),
    )(input)?;
    if !rest.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            rest,
            nom::error::ErrorKind::Eof,
        )));
    }
    Ok((rest, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_directory() {
        let dir = PeerDirectory::new();
        assert_eq!(dir.to_string(), "[]");
        assert_eq!(PeerDirectory::parse("[]").unwrap(), dir);
    }

    #[test]
    fn round_trips_populated_directory() {
        let mut dir = PeerDirectory::new();
        dir.insert("203.0.113.1", 55000);
        dir.insert("203.0.113.2", 55001);
        let wire = dir.to_string();
        assert_eq!(PeerDirectory::parse(&wire).unwrap(), dir);
    }

    #[test]
    fn rejects_malformed_directory() {
        assert!(PeerDirectory::parse("[[\"1.2.3.4\", 40000]").is_err());
        assert!(PeerDirectory::parse("not a directory at all").is_err());
        assert!(PeerDirectory::parse("[[\"1.2.3.4\", 99999]]").is_err());
    }

    #[test]
    fn merge_overwrites_on_conflict() {
        let mut a = PeerDirectory::new();
        a.insert("1.2.3.4", 1000);
        let mut b = PeerDirectory::new();
        b.insert("1.2.3.4", 2000);
        b.insert("5.6.7.8", 3000);
        a.merge(&b);
        assert_eq!(a.get("1.2.3.4"), Some(2000));
        assert_eq!(a.get("5.6.7.8"), Some(3000));
    }
}
