//! Sender classifier: identity is derived exclusively from the
//! datagram's transport source address, never from in-band MAVLink fields.

use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerIdentity {
    TrustedGcs,
    Untrusted,
}

pub fn classify(source_ip: IpAddr, trusted_gcs_ip: Option<IpAddr>) -> PeerIdentity {
    match trusted_gcs_ip {
        Some(trusted) if trusted == source_ip => PeerIdentity::TrustedGcs,
        _ => PeerIdentity::Untrusted,
    }
}
