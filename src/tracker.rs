//! HTTP tracker client: one blocking GET against the metainfo's `announce` URL, returning the
//! compact peer list from the bencoded response.

use bencode::{Bencode, BencodeDictValues};

use crate::peer::PeerAddr;

const LISTEN_PORT: u16 = 6881;

#[derive(Debug)]
pub struct TrackerClient {
    client: reqwest::blocking::Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        Self { client: reqwest::blocking::Client::new() }
    }

    /// Announces to `announce_url` and returns the peers the tracker handed back.
    ///
    /// `info_hash` and `peer_id` are percent-encoded by hand and spliced directly into the URL
    /// rather than through reqwest's own query encoder: both are raw 20-byte strings, not text,
    /// and reqwest's form encoder would double-encode the `%` our own encoding already produced.
    pub fn announce(
        &self,
        announce_url: &str,
        info_hash: &[u8; 20],
        peer_id: &[u8; 20],
        left: u64,
    ) -> Result<Vec<PeerAddr>, TrackerError> {
        let url = format!(
            "{announce_url}?info_hash={}&peer_id={}",
            percent_encode(info_hash),
            percent_encode(peer_id)
        );
        let query_params = [
            ("port", LISTEN_PORT.to_string()),
            ("uploaded", "0".to_string()),
            ("downloaded", "0".to_string()),
            ("left", left.to_string()),
            ("compact", "1".to_string()),
        ];

        let response = self
            .client
            .get(url)
            .query(&query_params)
            .send()
            .map_err(TrackerError::Request)?
            .bytes()
            .map_err(TrackerError::Request)?;

        let (decoded, _) = Bencode::from_bytes(&response, |key| match key {
            "peers" => Some(6),
            _ => None,
        })
        .map_err(|_| TrackerError::Malformed("could not decode bencoded tracker response".to_string()))?;

        let Bencode::Dict(table) = decoded else {
            return Err(TrackerError::Malformed("tracker response is not a dictionary".to_string()));
        };

        if let Some(BencodeDictValues::Bencode(Bencode::String(reason))) = table.get("failure reason") {
            return Err(TrackerError::Failure(reason.clone()));
        }

        match table.get("peers") {
            Some(BencodeDictValues::Bytes(chunks)) => chunks
                .iter()
                .map(|chunk| {
                    PeerAddr::try_from(chunk.as_slice()).map_err(|_| {
                        TrackerError::Malformed("peers string did not decode to 6-byte entries".to_string())
                    })
                })
                .collect(),
            _ => Err(TrackerError::Malformed("missing peers field".to_string())),
        }
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}

fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("tracker request failed")]
    Request(#[source] reqwest::Error),
    #[error("tracker reported failure: {0}")]
    Failure(String),
    #[error("malformed tracker response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encodes_reserved_bytes_only() {
        assert_eq!(percent_encode(b"A-_.~"), "A-_.~");
        assert_eq!(percent_encode(&[0xFF, 0x00, 0x2F]), "%FF%00%2F");
    }
}
