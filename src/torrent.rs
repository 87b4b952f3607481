//! Metainfo (`.torrent` file) decoding: single-file torrents only (multi-file is out of scope).
//!
//! A metainfo file is a bencoded dictionary with an `announce` string and an `info` dictionary
//! (`name`, `piece length`, `pieces`, `length`). The info-hash is the SHA-1 of the `info`
//! dictionary re-encoded in its canonical (sorted-key) bencoding.

use std::{io::Read, path::Path};

use bencode::{Bencode, BencodeDictValues};

#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub info_hash: [u8; 20],
    pub piece_hashes: Vec<[u8; 20]>,
    pub piece_length: u32,
    pub total_length: u64,
    pub name: String,
}

impl Metainfo {
    pub fn from_file(path: &Path) -> Result<Self, MetainfoError> {
        let mut file = std::fs::File::open(path).map_err(MetainfoError::Io)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).map_err(MetainfoError::Io)?;
        Self::from_bytes(&buffer)
    }

    pub fn from_bytes(encoded: &[u8]) -> Result<Self, MetainfoError> {
        let (value, _) = Bencode::from_bytes(encoded, |key| match key {
            "pieces" => Some(20),
            _ => None,
        })
        .map_err(|_| MetainfoError::Malformed("could not decode bencoded metainfo".to_string()))?;
        Self::try_from(value)
    }
}

impl TryFrom<Bencode> for Metainfo {
    type Error = MetainfoError;

    fn try_from(value: Bencode) -> Result<Self, Self::Error> {
        let Bencode::Dict(torrent_table) = value else {
            return Err(MetainfoError::Malformed(
                "metainfo file must be a bencoded dictionary".to_string(),
            ));
        };

        let announce = match torrent_table.get("announce") {
            Some(BencodeDictValues::Bencode(Bencode::String(s))) => s.clone(),
            _ => return Err(MetainfoError::Malformed("missing announce url".to_string())),
        };

        let info_value = match torrent_table.get("info") {
            Some(BencodeDictValues::Bencode(info)) => info,
            _ => return Err(MetainfoError::Malformed("missing info dictionary".to_string())),
        };

        let info_hash = info_hash(info_value)?;
        let (name, piece_length, total_length, piece_hashes) = parse_info(info_value)?;

        Ok(Self { announce, info_hash, piece_hashes, piece_length, total_length, name })
    }
}

fn parse_info(
    value: &Bencode,
) -> Result<(String, u32, u64, Vec<[u8; 20]>), MetainfoError> {
    let Bencode::Dict(info_table) = value else {
        return Err(MetainfoError::Malformed("info is not a dictionary".to_string()));
    };

    if info_table.contains_key("files") {
        return Err(MetainfoError::MultiFileNotSupported);
    }

    let name = match info_table.get("name") {
        Some(BencodeDictValues::Bencode(Bencode::String(s))) => s.clone(),
        _ => return Err(MetainfoError::Malformed("missing advisory name".to_string())),
    };

    let piece_length = match info_table.get("piece length") {
        Some(BencodeDictValues::Bencode(Bencode::Number(n))) => *n as u32,
        _ => return Err(MetainfoError::Malformed("missing piece length".to_string())),
    };

    let total_length = match info_table.get("length") {
        Some(BencodeDictValues::Bencode(Bencode::Number(n))) => *n as u64,
        _ => return Err(MetainfoError::Malformed("missing length".to_string())),
    };

    let piece_hashes = match info_table.get("pieces") {
        Some(BencodeDictValues::Bytes(chunks)) => chunks
            .iter()
            .map(|chunk| {
                <[u8; 20]>::try_from(chunk.as_slice())
                    .map_err(|_| MetainfoError::Malformed("piece hash is not 20 bytes".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(MetainfoError::Malformed("missing pieces".to_string())),
    };

    let expected_piece_count = (total_length as usize).div_ceil(piece_length as usize).max(1);
    if piece_hashes.len() != expected_piece_count {
        return Err(MetainfoError::Malformed(format!(
            "expected {expected_piece_count} piece hashes for a {total_length}-byte file at \
             piece length {piece_length}, got {}",
            piece_hashes.len()
        )));
    }

    Ok((name, piece_length, total_length, piece_hashes))
}

fn info_hash(value: &Bencode) -> Result<[u8; 20], MetainfoError> {
    let Bencode::Dict(info_table) = value else {
        return Err(MetainfoError::Malformed("info is not a dictionary".to_string()));
    };

    let name = match info_table.get("name") {
        Some(BencodeDictValues::Bencode(Bencode::String(s))) => s.clone(),
        _ => return Err(MetainfoError::Malformed("missing advisory name".to_string())),
    };
    let piece_length = match info_table.get("piece length") {
        Some(BencodeDictValues::Bencode(Bencode::Number(n))) => *n,
        _ => return Err(MetainfoError::Malformed("missing piece length".to_string())),
    };
    let length = match info_table.get("length") {
        Some(BencodeDictValues::Bencode(Bencode::Number(n))) => *n,
        _ => return Err(MetainfoError::Malformed("missing length".to_string())),
    };
    let pieces: Vec<u8> = match info_table.get("pieces") {
        Some(BencodeDictValues::Bytes(chunks)) => chunks.iter().flatten().copied().collect(),
        _ => return Err(MetainfoError::Malformed("missing pieces".to_string())),
    };

    // Canonical (sorted-key) bencoding of the info dictionary: `length`, `name`, `piece length`,
    // `pieces` — the order every conforming encoder already sorts to, per BEP3.
    let mut bytes = Vec::new();
    bytes.push(b'd');
    bytes.extend(format!("6:lengthi{length}e").into_bytes());
    bytes.extend(format!("4:name{}:{name}", name.len()).into_bytes());
    bytes.extend(format!("12:piece lengthi{piece_length}e").into_bytes());
    bytes.extend(format!("6:pieces{}:", pieces.len()).into_bytes());
    bytes.extend(&pieces);
    bytes.push(b'e');

    let mut hasher = sha1_smol::Sha1::new();
    hasher.update(&bytes);
    Ok(hasher.digest().bytes())
}

#[derive(thiserror::Error, Debug)]
pub enum MetainfoError {
    #[error("failed to read metainfo file")]
    Io(#[source] std::io::Error),
    #[error("malformed metainfo: {0}")]
    Malformed(String),
    #[error("multi-file torrents are not supported")]
    MultiFileNotSupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metainfo_bytes() -> Vec<u8> {
        let pieces = [[1u8; 20], [2u8; 20]].concat();
        let info = format!(
            "d6:lengthi8e4:name4:file12:piece lengthi4e6:pieces{}:",
            pieces.len()
        );
        let mut bytes = Vec::new();
        bytes.extend(b"d8:announce20:http://tracker.test/4:info".to_vec());
        bytes.extend(info.into_bytes());
        bytes.extend(&pieces);
        bytes.extend(b"ee");
        bytes
    }

    #[test]
    fn parses_single_file_metainfo() {
        let metainfo = Metainfo::from_bytes(&sample_metainfo_bytes()).unwrap();
        assert_eq!(metainfo.announce, "http://tracker.test/");
        assert_eq!(metainfo.name, "file");
        assert_eq!(metainfo.piece_length, 4);
        assert_eq!(metainfo.total_length, 8);
        assert_eq!(metainfo.piece_hashes, vec![[1u8; 20], [2u8; 20]]);
    }

    #[test]
    fn rejects_multi_file_torrents() {
        let bytes = b"d8:announce20:http://tracker.test/4:infod5:filesle6:lengthi0e4:name1:x12:piece lengthi4e6:pieces0:ee".to_vec();
        let err = Metainfo::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MetainfoError::MultiFileNotSupported));
    }
}
