/// How much of the platform's media feature set is available.
///
/// Resolved once at startup and passed into the engines as plain
/// configuration; nothing else in the crate inspects OS versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CapabilityLevel {
    /// Direct file access, no consent prompts, base field set.
    Legacy,
    /// Sandboxed storage: thumbnail loading through the store, extra
    /// album fields.
    ScopedStorage,
    /// The store mediates favorites and bulk deletion behind user-consent
    /// prompts and exposes trash/pending/favorite metadata.
    ConsentManaged,
}

impl CapabilityLevel {
    /// Thumbnails can only be decoded through the store from the
    /// scoped-storage level up.
    pub fn supports_thumbnail_loading(self) -> bool {
        self >= CapabilityLevel::ScopedStorage
    }

    /// Favorite toggles go through a consent prompt, available from the
    /// consent-managed level up.
    pub fn supports_favorite_requests(self) -> bool {
        self >= CapabilityLevel::ConsentManaged
    }

    /// Whether bulk deletion must be routed through a consent prompt
    /// instead of touching files directly.
    pub fn requires_deletion_consent(self) -> bool {
        self >= CapabilityLevel::ConsentManaged
    }
}
