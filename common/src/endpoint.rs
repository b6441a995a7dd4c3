//! Endpoint URIs: `proto://host:port`.
//!
//! The protocol names a transport payload: plain RTP, RTP plus a FEC
//! repair stream, a bare repair stream, or RTCP control. Port 0 asks
//! for an ephemeral port.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::fec::FecScheme;

/// Endpoint protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    // ---
    /// Plain RTP media.
    Rtp,

    /// RTP media belonging to a Reed-Solomon protected stream.
    RtpRs8m,

    /// Reed-Solomon repair stream.
    Rs8m,

    /// RTP media belonging to an LDPC protected stream.
    RtpLdpc,

    /// LDPC repair stream.
    Ldpc,

    /// RTCP control.
    Rtcp,

    /// RTSP negotiation (parsed, not served).
    Rtsp,
}

impl Proto {
    // ---
    /// The FEC scheme this protocol implies, if any.
    pub fn fec_scheme(&self) -> FecScheme {
        // ---
        match self {
            Proto::RtpRs8m | Proto::Rs8m => FecScheme::Rs8m,
            Proto::RtpLdpc | Proto::Ldpc => FecScheme::Ldpc,
            _ => FecScheme::Disable,
        }
    }

    /// Whether this endpoint carries the repair stream.
    pub fn is_repair(&self) -> bool {
        // ---
        matches!(self, Proto::Rs8m | Proto::Ldpc)
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            Proto::Rtp => "rtp",
            Proto::RtpRs8m => "rtp+rs8m",
            Proto::Rs8m => "rs8m",
            Proto::RtpLdpc => "rtp+ldpc",
            Proto::Ldpc => "ldpc",
            Proto::Rtcp => "rtcp",
            Proto::Rtsp => "rtsp",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Proto {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s {
            "rtp" => Ok(Proto::Rtp),
            "rtp+rs8m" => Ok(Proto::RtpRs8m),
            "rs8m" => Ok(Proto::Rs8m),
            "rtp+ldpc" => Ok(Proto::RtpLdpc),
            "ldpc" => Ok(Proto::Ldpc),
            "rtcp" => Ok(Proto::Rtcp),
            "rtsp" => Ok(Proto::Rtsp),
            other => anyhow::bail!("unknown endpoint protocol: {}", other),
        }
    }
}

/// A parsed endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    // ---
    pub proto: Proto,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    // ---
    /// Socket address string suitable for bind/connect.
    pub fn socket_addr(&self) -> String {
        // ---
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{}://{}:{}", self.proto, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    /// Parses `proto://host:port`.
    ///
    /// # Errors
    ///
    /// Returns error on missing scheme separator, unknown protocol,
    /// empty host, or an unparsable port.
    fn from_str(s: &str) -> Result<Self> {
        // ---
        let (proto, rest) = s
            .split_once("://")
            .with_context(|| format!("endpoint missing '://': {}", s))?;
        let proto: Proto = proto.parse()?;

        let (host, port) = rest
            .rsplit_once(':')
            .with_context(|| format!("endpoint missing port: {}", s))?;
        if host.is_empty() {
            anyhow::bail!("endpoint has empty host: {}", s);
        }

        let port: u16 = port
            .parse()
            .with_context(|| format!("bad endpoint port: {}", port))?;

        Ok(Self {
            proto,
            host: host.to_string(),
            port,
        })
    }
}
