use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Ipv4,
    Ipv6,
}

/// A network lease from the address pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: u64,
    pub address: IpAddr,
    /// Prefix length.
    pub cidr: u8,
    pub gateway: IpAddr,
    pub kind: AddressKind,
    /// Owning guest once claimed.
    pub guest: Option<Uuid>,
    pub is_primary: bool,
}

impl Address {
    /// Cloud-init `ipconfig{n}` value for this lease.
    #[must_use]
    pub fn ipconfig(&self) -> String {
        match self.kind {
            AddressKind::Ipv4 => format!("ip={}/{},gw={}", self.address, self.cidr, self.gateway),
            AddressKind::Ipv6 => {
                format!("ip6={}/{},gw6={}", self.address, self.cidr, self.gateway)
            }
        }
    }
}
