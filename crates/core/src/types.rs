//! Identity and enumeration types shared by the call graph
//!
//! - CallId: opaque call identifier
//! - CallType: own vs. foreign ownership of a call
//! - AddressFamily: socket family with its SDP (RFC 4566) name
//! - TransportProtocol: media transport protocol

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique call identifier.
///
/// Treated as an opaque string; it only needs to be stable and usable as part
/// of a store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        CallId(id.into())
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId(s.to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        CallId(s)
    }
}

/// Who owns a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    /// Managed by this daemon instance
    Own,
    /// Managed by a peer instance, cached here from change notifications
    Foreign,
}

impl CallType {
    /// True for calls owned by another daemon instance.
    pub fn is_foreign(self) -> bool {
        matches!(self, CallType::Foreign)
    }
}

/// Socket address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4 (`IP4`)
    Ipv4,
    /// IPv6 (`IP6`)
    Ipv6,
}

impl AddressFamily {
    /// SDP name of the family.
    pub fn rfc_name(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "IP4",
            AddressFamily::Ipv6 => "IP6",
        }
    }

    /// Parse an SDP family name.
    pub fn from_rfc(name: &str) -> Option<Self> {
        match name {
            "IP4" => Some(AddressFamily::Ipv4),
            "IP6" => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rfc_name())
    }
}

/// Media transport protocol as negotiated in SDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    /// `RTP/AVP`
    RtpAvp,
    /// `RTP/SAVP`
    RtpSavp,
    /// `RTP/AVPF`
    RtpAvpf,
    /// `RTP/SAVPF`
    RtpSavpf,
    /// `UDP/TLS/RTP/SAVP`
    UdpTlsRtpSavp,
    /// `UDP/TLS/RTP/SAVPF`
    UdpTlsRtpSavpf,
    /// `UDPTL`
    Udptl,
}

const PROTOCOLS: [(TransportProtocol, &str); 7] = [
    (TransportProtocol::RtpAvp, "RTP/AVP"),
    (TransportProtocol::RtpSavp, "RTP/SAVP"),
    (TransportProtocol::RtpAvpf, "RTP/AVPF"),
    (TransportProtocol::RtpSavpf, "RTP/SAVPF"),
    (TransportProtocol::UdpTlsRtpSavp, "UDP/TLS/RTP/SAVP"),
    (TransportProtocol::UdpTlsRtpSavpf, "UDP/TLS/RTP/SAVPF"),
    (TransportProtocol::Udptl, "UDPTL"),
];

impl TransportProtocol {
    /// Protocol name as it appears in SDP.
    pub fn name(self) -> &'static str {
        PROTOCOLS
            .iter()
            .find(|(p, _)| *p == self)
            .map(|(_, n)| *n)
            .unwrap_or("")
    }

    /// Look a protocol up by SDP name.
    pub fn from_name(name: &str) -> Option<Self> {
        PROTOCOLS.iter().find(|(_, n)| *n == name).map(|(p, _)| *p)
    }

    /// Whether the protocol carries SRTP.
    pub fn is_secure(self) -> bool {
        !matches!(
            self,
            TransportProtocol::RtpAvp | TransportProtocol::RtpAvpf | TransportProtocol::Udptl
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names() {
        assert_eq!(AddressFamily::from_rfc("IP4"), Some(AddressFamily::Ipv4));
        assert_eq!(AddressFamily::from_rfc("IP6"), Some(AddressFamily::Ipv6));
        assert_eq!(AddressFamily::from_rfc("ip4"), None);
        assert_eq!(AddressFamily::Ipv6.rfc_name(), "IP6");
    }

    #[test]
    fn test_protocol_names() {
        for (proto, name) in PROTOCOLS {
            assert_eq!(proto.name(), name);
            assert_eq!(TransportProtocol::from_name(name), Some(proto));
        }
        assert_eq!(TransportProtocol::from_name(""), None);
        assert!(TransportProtocol::RtpSavpf.is_secure());
        assert!(!TransportProtocol::RtpAvp.is_secure());
    }

    #[test]
    fn test_call_type() {
        assert!(CallType::Foreign.is_foreign());
        assert!(!CallType::Own.is_foreign());
    }

    #[test]
    fn test_call_id_display() {
        let id = CallId::new("abc@host");
        assert_eq!(id.to_string(), "abc@host");
        assert_eq!(CallId::from("abc@host"), id);
    }
}
