//! PBAP feature and repository bitmaps.

/// PBAP supported features bitmap (SDP attribute and CONNECT parameter).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PbapFeatures(u32);

impl PbapFeatures {
    /// No features.
    pub const NONE: Self = Self(0);
    pub const DOWNLOAD: Self = Self(1 << 0);
    pub const BROWSING: Self = Self(1 << 1);
    pub const DATABASE_IDENTIFIER: Self = Self(1 << 2);
    pub const FOLDER_VERSION_COUNTERS: Self = Self(1 << 3);
    pub const VCARD_SELECTING: Self = Self(1 << 4);
    pub const ENHANCED_MISSED_CALLS: Self = Self(1 << 5);
    pub const X_BT_UCI: Self = Self(1 << 6);
    pub const X_BT_UID: Self = Self(1 << 7);
    pub const CONTACT_REFERENCING: Self = Self(1 << 8);
    pub const DEFAULT_CONTACT_IMAGE_FORMAT: Self = Self(1 << 9);

    /// Assumed when a peer's SDP record omits the attribute.
    pub const PEER_DEFAULT: Self = Self(0x0003);

    /// Creates features from the raw bitmap.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bitmap.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PbapFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Repositories a phone book server exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Repositories(u8);

impl Repositories {
    pub const LOCAL: Self = Self(1 << 0);
    pub const SIM: Self = Self(1 << 1);
    pub const SPEED_DIAL: Self = Self(1 << 2);
    pub const FAVORITES: Self = Self(1 << 3);

    /// Creates repositories from the raw bitmap.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the raw bitmap.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_default_is_download_and_browsing() {
        assert_eq!(
            PbapFeatures::PEER_DEFAULT,
            PbapFeatures::DOWNLOAD | PbapFeatures::BROWSING
        );
        assert!(!PbapFeatures::PEER_DEFAULT.contains(PbapFeatures::VCARD_SELECTING));
    }

    #[test]
    fn test_repositories() {
        let repos = Repositories::from_bits(0x05);
        assert!(repos.contains(Repositories::LOCAL));
        assert!(repos.contains(Repositories::SPEED_DIAL));
        assert!(!repos.contains(Repositories::SIM));
    }
}
