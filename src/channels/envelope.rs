//! Minimal message envelope.
//!
//! A fetched document starts with `name=value` header lines, terminated by
//! an empty line; everything after that is the message body handed to the
//! mailbox.
//!
//! ```text
//! id=42
//!
//! <body>
//! ```

use std::collections::BTreeMap;
use std::io::BufRead;

/// Header carrying the message id.
pub const ID_HEADER: &str = "id";

/// Parsed envelope header. The reader it came from stays positioned at the
/// start of the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeHeader {
    headers: BTreeMap<String, String>,
    /// Whether the blank line separating header and body was seen.
    has_body: bool,
}

/// Why an envelope's id could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdProblem {
    Missing,
    NotNumeric(String),
}

impl EnvelopeHeader {
    /// Read header lines up to and including the separating blank line.
    pub fn read_from(reader: &mut impl BufRead) -> std::io::Result<Self> {
        let mut header = Self::default();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(header);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                header.has_body = true;
                return Ok(header);
            }
            if let Some((name, value)) = trimmed.split_once('=') {
                header.headers.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// The message id.
    pub fn id(&self) -> Result<u64, IdProblem> {
        let raw = self.headers.get(ID_HEADER).ok_or(IdProblem::Missing)?;
        raw.trim()
            .parse()
            .map_err(|_| IdProblem::NotNumeric(raw.clone()))
    }

    /// Whether a body follows the header.
    pub fn has_body(&self) -> bool {
        self.has_body
    }
}

/// Build an envelope around `body`.
pub fn encode(id: u64, body: &[u8]) -> Vec<u8> {
    let mut out = format!("{ID_HEADER}={id}\n\n").into_bytes();
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;

    #[test]
    fn test_parses_header_and_leaves_body() {
        let mut reader = Cursor::new(b"id=42\nfrom=alice\n\nhello\nworld\n".to_vec());
        let header = EnvelopeHeader::read_from(&mut reader).unwrap();
        assert_eq!(header.id(), Ok(42));
        assert!(header.has_body());

        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello\nworld\n");
    }

    #[test]
    fn test_crlf_separator() {
        let mut reader = Cursor::new(b"id=5\r\n\r\nbody".to_vec());
        let header = EnvelopeHeader::read_from(&mut reader).unwrap();
        assert_eq!(header.id(), Ok(5));
        assert!(header.has_body());
    }

    #[test]
    fn test_missing_id() {
        let mut reader = Cursor::new(b"from=alice\n\nbody".to_vec());
        let header = EnvelopeHeader::read_from(&mut reader).unwrap();
        assert_eq!(header.id(), Err(IdProblem::Missing));
    }

    #[test]
    fn test_non_numeric_id() {
        let mut reader = Cursor::new(b"id=forty-two\n\nbody".to_vec());
        let header = EnvelopeHeader::read_from(&mut reader).unwrap();
        assert_eq!(
            header.id(),
            Err(IdProblem::NotNumeric("forty-two".to_string()))
        );
        let mut reader = Cursor::new(b"id=-1\n\nbody".to_vec());
        assert!(EnvelopeHeader::read_from(&mut reader).unwrap().id().is_err());
    }

    #[test]
    fn test_no_separator_means_no_body() {
        let mut reader = Cursor::new(b"id=1\n".to_vec());
        let header = EnvelopeHeader::read_from(&mut reader).unwrap();
        assert_eq!(header.id(), Ok(1));
        assert!(!header.has_body());
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(9, b"payload");
        assert_eq!(bytes, b"id=9\n\npayload");
    }
}
