//! Bluetooth device addresses.

use std::str::FromStr;

use crate::error::Error;

/// Length of a device address in bytes.
pub const BD_ADDR_LEN: usize = 6;

/// A 48-bit Bluetooth device address, most significant octet first.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BdAddr([u8; BD_ADDR_LEN]);

impl BdAddr {
    /// Creates an address from its octets, most significant first.
    #[must_use]
    pub const fn new(octets: [u8; BD_ADDR_LEN]) -> Self {
        Self(octets)
    }

    /// Returns the address octets.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BD_ADDR_LEN] {
        &self.0
    }
}

impl FromStr for BdAddr {
    type Err = Error;

    /// Parses the colon-separated form, e.g. `00:1A:7D:DA:71:13`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != BD_ADDR_LEN {
            return Err(Error::InvalidAddress {
                reason: format!("expected 6 octets, got {}", parts.len()),
            });
        }
        let mut octets = [0u8; BD_ADDR_LEN];
        for (octet, part) in octets.iter_mut().zip(parts) {
            let decoded = hex::decode(part).map_err(|e| Error::InvalidAddress {
                reason: format!("{part}: {e}"),
            })?;
            if decoded.len() != 1 {
                return Err(Error::InvalidAddress {
                    reason: format!("{part}: octet must be two hex digits"),
                });
            }
            *octet = decoded[0];
        }
        Ok(Self(octets))
    }
}

impl std::fmt::Display for BdAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| hex::encode_upper([*b])).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl std::fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BdAddr({self})")
    }
}
