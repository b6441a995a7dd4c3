//! Forward error correction: block codecs and wire framing.
//!
//! A FEC block covers `K` source packets followed by `R` repair
//! packets. Encoding symbol ids `0..K` are the source positions,
//! `K..K+R` the repair positions. The codecs are pure symbol math;
//! block assembly lives in the receiver's FEC reader and the sender's
//! FEC writer.

mod gf256;
mod ldpc;
mod rs8m;

pub use ldpc::LdpcCodec;
pub use rs8m::Rs8mCodec;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;

/// FEC scheme selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FecScheme {
    // ---
    /// No FEC; repair packets are rejected at the router.
    #[default]
    Disable,

    /// Reed-Solomon over GF(256).
    Rs8m,

    /// LDPC-Staircase.
    Ldpc,
}

impl FecScheme {
    // ---
    pub fn is_enabled(&self) -> bool {
        // ---
        !matches!(self, FecScheme::Disable)
    }
}

impl fmt::Display for FecScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            FecScheme::Disable => "disable",
            FecScheme::Rs8m => "rs8m",
            FecScheme::Ldpc => "ldpc",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for FecScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s {
            "disable" => Ok(FecScheme::Disable),
            "rs8m" => Ok(FecScheme::Rs8m),
            "ldpc" => Ok(FecScheme::Ldpc),
            other => anyhow::bail!("unknown FEC scheme: {}", other),
        }
    }
}

/// FEC codec failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecError {
    // ---
    /// The (K, R) geometry is not representable by the scheme.
    BadGeometry { k: usize, r: usize },

    /// Not enough independent symbols to decode the block.
    InsufficientRank,
}

impl fmt::Display for FecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        match self {
            FecError::BadGeometry { k, r } => {
                write!(f, "unsupported FEC geometry: k={} r={}", k, r)
            }
            FecError::InsufficientRank => write!(f, "insufficient symbols to decode block"),
        }
    }
}

impl std::error::Error for FecError {}

/// A block codec instance, selected at pipeline build time.
#[derive(Debug, Clone)]
pub enum BlockCodec {
    // ---
    Rs8m(Rs8mCodec),
    Ldpc(LdpcCodec),
}

impl BlockCodec {
    // ---
    /// Builds the codec for a scheme and geometry.
    ///
    /// Returns `None` for [`FecScheme::Disable`].
    pub fn new(scheme: FecScheme, k: usize, r: usize) -> Result<Option<Self>, FecError> {
        // ---
        match scheme {
            FecScheme::Disable => Ok(None),
            FecScheme::Rs8m => Ok(Some(BlockCodec::Rs8m(Rs8mCodec::new(k, r)?))),
            FecScheme::Ldpc => Ok(Some(BlockCodec::Ldpc(LdpcCodec::new(k, r)?))),
        }
    }

    /// Produces the repair symbols for a full set of source symbols.
    pub fn encode(&self, source: &[&[u8]]) -> Vec<Vec<u8>> {
        // ---
        match self {
            BlockCodec::Rs8m(c) => c.encode(source),
            BlockCodec::Ldpc(c) => c.encode(source),
        }
    }

    /// Fills missing source slots from whatever symbols are present.
    pub fn decode(&self, symbols: &mut [Option<Vec<u8>>]) -> Result<(), FecError> {
        // ---
        match self {
            BlockCodec::Rs8m(c) => c.decode(symbols),
            BlockCodec::Ldpc(c) => c.decode(symbols),
        }
    }
}

/// FEC payload id carried on the wire.
///
/// Source packets append it to the payload, repair packets prefix it:
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// |  block number   |  symbol id      |   K    |   R    |  payload length |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecPayloadId {
    // ---
    pub blknum: u16,
    pub esi: u16,
    pub n_source: u8,
    pub n_repair: u8,
    pub payload_len: u16,
}

impl FecPayloadId {
    // ---
    /// Encoded length in bytes.
    pub const LEN: usize = 8;

    pub fn write(&self, buf: &mut Vec<u8>) {
        // ---
        buf.extend_from_slice(&self.blknum.to_be_bytes());
        buf.extend_from_slice(&self.esi.to_be_bytes());
        buf.push(self.n_source);
        buf.push(self.n_repair);
        buf.extend_from_slice(&self.payload_len.to_be_bytes());
    }

    /// Parses the id from the first [`Self::LEN`] bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns error on truncation or zero K.
    pub fn parse(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < Self::LEN {
            anyhow::bail!("FEC payload id truncated: {} bytes", data.len());
        }

        let id = Self {
            blknum: u16::from_be_bytes([data[0], data[1]]),
            esi: u16::from_be_bytes([data[2], data[3]]),
            n_source: data[4],
            n_repair: data[5],
            payload_len: u16::from_be_bytes([data[6], data[7]]),
        };

        if id.n_source == 0 {
            anyhow::bail!("FEC payload id with zero source packets");
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_payload_id_roundtrip() {
        // ---
        let id = FecPayloadId {
            blknum: 0xABCD,
            esi: 21,
            n_source: 20,
            n_repair: 10,
            payload_len: 640,
        };

        let mut buf = Vec::new();
        id.write(&mut buf);
        assert_eq!(buf.len(), FecPayloadId::LEN);

        let parsed = FecPayloadId::parse(&buf).expect("parse failed");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_payload_id_truncated() {
        // ---
        assert!(FecPayloadId::parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_scheme_parse() {
        // ---
        assert_eq!("rs8m".parse::<FecScheme>().unwrap(), FecScheme::Rs8m);
        assert_eq!("ldpc".parse::<FecScheme>().unwrap(), FecScheme::Ldpc);
        assert_eq!("disable".parse::<FecScheme>().unwrap(), FecScheme::Disable);
        assert!("xor".parse::<FecScheme>().is_err());
    }

    #[test]
    fn test_codec_dispatch() {
        // ---
        assert!(BlockCodec::new(FecScheme::Disable, 4, 2).unwrap().is_none());

        let codec = BlockCodec::new(FecScheme::Rs8m, 4, 2).unwrap().unwrap();
        let source: Vec<Vec<u8>> = (0..4).map(|i| vec![i as u8; 8]).collect();
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);
        assert_eq!(repair.len(), 2);
        assert_eq!(repair[0].len(), 8);
    }
}
