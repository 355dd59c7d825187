//! Per-call options and their normalization.
//!
//! Every field is optional and defaults independently (`false` for every flag).
//! Before an operation runs, its options pass through [`Normalize::normalize`],
//! which applies the direct I/O override used by privileged internal callers:
//! `allow_concurrency` and `no_cache` are forced on regardless of what the
//! caller asked for.
//!
//! Alarm options deliberately have no `no_cache` field. They are widened into
//! [`GetOptions`]/[`PutOptions`] with `no_cache` unset before normalization.
//!
//! ```
//! use actor_storage::options::{GetOptions, Normalize};
//!
//! let opts = GetOptions::builder().no_cache(false).build().normalize(true);
//! assert!(opts.allow_concurrency());
//! assert!(opts.no_cache());
//! ```

/// Options the cache engine understands for reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Bypass the cache: do not populate it with the values read.
    pub no_cache: bool,
}

/// Options the cache engine understands for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Do not hold output until the write is confirmed durable.
    pub allow_unconfirmed: bool,
    /// Do not keep the written value resident in the cache.
    pub no_cache: bool,
}

/// Applies the direct I/O policy to a set of options.
pub trait Normalize: Sized {
    /// Returns the options with the direct I/O override applied when `direct_io` is set.
    #[must_use]
    fn normalize(self, direct_io: bool) -> Self;

    /// Whether the call may resolve independently of earlier pending inputs.
    fn allow_concurrency(&self) -> bool;
}

/// Options for `get` and `get_many`.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct GetOptions {
    /// Resolve independently of other pending operations.
    pub allow_concurrency: Option<bool>,
    /// Bypass the cache.
    pub no_cache: Option<bool>,
}

impl GetOptions {
    /// Effective `no_cache` flag.
    #[must_use]
    pub fn no_cache(&self) -> bool {
        self.no_cache.unwrap_or(false)
    }

    /// Engine read options derived from these options.
    #[must_use]
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions { no_cache: self.no_cache() }
    }
}

impl Normalize for GetOptions {
    fn normalize(mut self, direct_io: bool) -> Self {
        if direct_io {
            self.allow_concurrency = Some(true);
            self.no_cache = Some(true);
        }
        self
    }

    fn allow_concurrency(&self) -> bool {
        self.allow_concurrency.unwrap_or(false)
    }
}

/// Options for `get_alarm`.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct GetAlarmOptions {
    /// Resolve independently of other pending operations.
    pub allow_concurrency: Option<bool>,
}

impl From<GetAlarmOptions> for GetOptions {
    fn from(options: GetAlarmOptions) -> Self {
        Self { allow_concurrency: options.allow_concurrency, no_cache: Some(false) }
    }
}

/// Options for `list`.
///
/// `start` is inclusive, `start_after` exclusive, `end` exclusive. `start`
/// and `start_after` are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct ListOptions {
    /// First key to include.
    #[builder(into)]
    pub start: Option<Vec<u8>>,
    /// Key after which listing starts.
    #[builder(into)]
    pub start_after: Option<Vec<u8>>,
    /// Key at which listing stops (exclusive).
    #[builder(into)]
    pub end: Option<Vec<u8>>,
    /// Only return keys beginning with these bytes.
    #[builder(into)]
    pub prefix: Option<Vec<u8>>,
    /// Return keys in descending order.
    pub reverse: Option<bool>,
    /// Maximum number of entries to return; must be positive.
    pub limit: Option<i64>,
    /// Resolve independently of other pending operations.
    pub allow_concurrency: Option<bool>,
    /// Bypass the cache.
    pub no_cache: Option<bool>,
}

impl ListOptions {
    /// Effective `reverse` flag.
    #[must_use]
    pub fn reverse(&self) -> bool {
        self.reverse.unwrap_or(false)
    }

    /// Effective `no_cache` flag.
    #[must_use]
    pub fn no_cache(&self) -> bool {
        self.no_cache.unwrap_or(false)
    }

    /// Engine read options derived from these options.
    #[must_use]
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions { no_cache: self.no_cache() }
    }
}

impl Normalize for ListOptions {
    fn normalize(mut self, direct_io: bool) -> Self {
        if direct_io {
            self.allow_concurrency = Some(true);
            self.no_cache = Some(true);
        }
        self
    }

    fn allow_concurrency(&self) -> bool {
        self.allow_concurrency.unwrap_or(false)
    }
}

/// Options for `put`, `put_many`, `delete`, `delete_many` and `delete_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct PutOptions {
    /// Resolve independently of other pending operations.
    pub allow_concurrency: Option<bool>,
    /// Release output before the write is confirmed.
    pub allow_unconfirmed: Option<bool>,
    /// Do not keep the written value in the cache.
    pub no_cache: Option<bool>,
}

impl PutOptions {
    /// Effective `allow_unconfirmed` flag.
    #[must_use]
    pub fn allow_unconfirmed(&self) -> bool {
        self.allow_unconfirmed.unwrap_or(false)
    }

    /// Effective `no_cache` flag.
    #[must_use]
    pub fn no_cache(&self) -> bool {
        self.no_cache.unwrap_or(false)
    }

    /// Engine write options derived from these options.
    #[must_use]
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions { allow_unconfirmed: self.allow_unconfirmed(), no_cache: self.no_cache() }
    }
}

impl Normalize for PutOptions {
    fn normalize(mut self, direct_io: bool) -> Self {
        if direct_io {
            self.allow_concurrency = Some(true);
            self.no_cache = Some(true);
        }
        self
    }

    fn allow_concurrency(&self) -> bool {
        self.allow_concurrency.unwrap_or(false)
    }
}

/// Options for `set_alarm` and `delete_alarm`.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct SetAlarmOptions {
    /// Resolve independently of other pending operations.
    pub allow_concurrency: Option<bool>,
    /// Release output before the write is confirmed.
    pub allow_unconfirmed: Option<bool>,
}

impl From<SetAlarmOptions> for PutOptions {
    fn from(options: SetAlarmOptions) -> Self {
        Self {
            allow_concurrency: options.allow_concurrency,
            allow_unconfirmed: options.allow_unconfirmed,
            no_cache: Some(false),
        }
    }
}
