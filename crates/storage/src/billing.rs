//! Conversion of byte counts and cache-status tallies into billing units.
//!
//! A billing unit is 4096 bytes, rounded up. Operations that touch zero bytes
//! normally still cost one unit (a miss is still a lookup), with one exception:
//! a `list()` served entirely from cache reports zero uncached units.

use crate::types::{CacheStatus, CachedEntry};

/// Size of one billing unit in bytes.
pub const BILLING_UNIT: usize = 4096;

/// Whether a zero-byte operation is billed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillAtLeastOne {
    /// Zero bytes cost zero units.
    No,
    /// Zero bytes cost one unit.
    Yes,
}

/// Returns `ceil(bytes / 4096)`, or 1 for zero bytes when `at_least_one` is [`BillAtLeastOne::Yes`].
#[must_use]
pub fn billing_units(bytes: usize, at_least_one: BillAtLeastOne) -> u32 {
    if at_least_one == BillAtLeastOne::Yes && bytes == 0 {
        return 1;
    }
    u32::try_from(bytes.div_ceil(BILLING_UNIT)).unwrap_or(u32::MAX)
}

/// Read units split by cache status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadUnits {
    /// Units served from cache.
    pub cached: u32,
    /// Units that required the backing store.
    pub uncached: u32,
}

impl ReadUnits {
    /// Total units.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.cached + self.uncached
    }
}

/// Units for a single-key `get`: the value size, or one uncached unit on a miss.
#[must_use]
pub fn get_one_units(entry: Option<&CachedEntry>) -> ReadUnits {
    match entry {
        Some(entry) => {
            let units = billing_units(entry.value.len(), BillAtLeastOne::Yes);
            match entry.status {
                CacheStatus::Cached => ReadUnits { cached: units, uncached: 0 },
                CacheStatus::Uncached => ReadUnits { cached: 0, uncached: units },
            }
        },
        None => ReadUnits { cached: 0, uncached: 1 },
    }
}

/// Units for a multi-key `get`.
///
/// Each returned entry is billed by its own status. Every requested key that
/// did not come back is billed as one uncached unit, since the negative lookup
/// still went to storage.
#[must_use]
pub fn get_many_units(entries: &[CachedEntry], requested: usize) -> ReadUnits {
    let mut units = ReadUnits::default();
    for entry in entries {
        let entry_units = billing_units(entry.billable_bytes(), BillAtLeastOne::Yes);
        match entry.status {
            CacheStatus::Cached => units.cached += entry_units,
            CacheStatus::Uncached => units.uncached += entry_units,
        }
    }
    let missing = requested.saturating_sub(entries.len());
    units.uncached += u32::try_from(missing).unwrap_or(u32::MAX);
    units
}

/// Units for a `list()` that reached the cache engine.
///
/// An empty result costs one uncached unit. Otherwise the total is billed on
/// combined bytes, and the uncached share is at least one unit unless every
/// entry came from cache.
#[must_use]
pub fn list_units(entries: &[CachedEntry]) -> ReadUnits {
    let (mut cached_bytes, mut uncached_bytes) = (0usize, 0usize);
    for entry in entries {
        match entry.status {
            CacheStatus::Cached => cached_bytes += entry.billable_bytes(),
            CacheStatus::Uncached => uncached_bytes += entry.billable_bytes(),
        }
    }

    if cached_bytes == 0 && uncached_bytes == 0 {
        return ReadUnits { cached: 0, uncached: 1 };
    }

    let total = billing_units(cached_bytes + uncached_bytes, BillAtLeastOne::Yes);
    let completely_cached = entries.iter().all(|e| e.status == CacheStatus::Cached);
    let at_least_one = if completely_cached { BillAtLeastOne::No } else { BillAtLeastOne::Yes };
    let uncached = billing_units(uncached_bytes, at_least_one).min(total);
    ReadUnits { cached: total - uncached, uncached }
}

/// Write units for one stored entry: key plus encoded value.
#[must_use]
pub fn write_units(key: &[u8], encoded_value: &[u8]) -> u32 {
    billing_units(key.len() + encoded_value.len(), BillAtLeastOne::Yes)
}
