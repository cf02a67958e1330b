//! Where a tenant slug came from.

use std::fmt;

/// Source from which a tenant slug was extracted.
///
/// Sources are listed in resolution order (highest to lowest):
/// 1. Trusted gateway header
/// 2. `/t/{slug}/...` path segment
/// 3. Authenticated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenantSource {
    /// Slug carried by the trusted gateway header.
    Header,
    /// Slug carried by the `/t/{slug}/` path prefix.
    Path,
    /// Slug bound to the authenticated session.
    Session,
}

impl TenantSource {
    /// All sources in resolution order.
    pub const RESOLUTION_ORDER: [TenantSource; 3] =
        [TenantSource::Header, TenantSource::Path, TenantSource::Session];

    /// Returns the priority of this source (higher = consulted first).
    pub fn priority(&self) -> u8 {
        match self {
            TenantSource::Header => 3,
            TenantSource::Path => 2,
            TenantSource::Session => 1,
        }
    }
}

impl fmt::Display for TenantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantSource::Header => write!(f, "header"),
            TenantSource::Path => write!(f, "path"),
            TenantSource::Session => write!(f, "session"),
        }
    }
}

impl Ord for TenantSource {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for TenantSource {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The raw tenant slugs carried by one request, one per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSignals {
    /// Value of the trusted gateway header.
    pub header: Option<String>,
    /// Slug from the path prefix.
    pub path: Option<String>,
    /// Slug bound to the authenticated session.
    pub session: Option<String>,
}

impl TenantSignals {
    /// Creates an empty signal set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the header signal.
    pub fn with_header(mut self, slug: impl Into<String>) -> Self {
        self.header = Some(slug.into());
        self
    }

    /// Sets the path signal.
    pub fn with_path(mut self, slug: impl Into<String>) -> Self {
        self.path = Some(slug.into());
        self
    }

    /// Sets the session signal.
    pub fn with_session(mut self, slug: impl Into<String>) -> Self {
        self.session = Some(slug.into());
        self
    }

    /// Returns the signal for `source`, ignoring blank values.
    pub fn get(&self, source: TenantSource) -> Option<&str> {
        let value = match source {
            TenantSource::Header => self.header.as_deref(),
            TenantSource::Path => self.path.as_deref(),
            TenantSource::Session => self.session.as_deref(),
        };
        value.map(str::trim).filter(|s| !s.is_empty())
    }

    /// Returns every present signal in resolution order.
    pub fn present(&self) -> Vec<(TenantSource, &str)> {
        TenantSource::RESOLUTION_ORDER
            .iter()
            .filter_map(|source| self.get(*source).map(|slug| (*source, slug)))
            .collect()
    }

    /// Returns `true` if no source carries a slug.
    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }
}
