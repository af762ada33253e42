//! Cache configuration.
//!
//! Per-entity TTLs and the capacity bound, populated from the `[cache]`
//! section of `talentgrid.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::keys::EntityKind;

const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_OFFERS_TTL: Duration = Duration::from_secs(3 * 60);
const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied by `set` and by entities without a specific TTL.
    pub default_ttl: Duration,
    pub profile_ttl: Duration,
    pub offers_ttl: Duration,
    /// Capacity bound; least recently used entries are evicted beyond it.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            profile_ttl: DEFAULT_PROFILE_TTL,
            offers_ttl: DEFAULT_OFFERS_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl: settings.default_ttl,
            profile_ttl: settings.profile_ttl,
            offers_ttl: settings.offers_ttl,
            max_entries: settings.max_entries.get(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, entity: EntityKind) -> Duration {
        match entity {
            EntityKind::Profile => self.profile_ttl,
            EntityKind::Offers => self.offers_ttl,
            EntityKind::Applications | EntityKind::Feed | EntityKind::Messages => {
                self.default_ttl
            }
        }
    }

    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
