//! List range compilation.
//!
//! Turns the user-facing `start`/`start_after`/`end`/`prefix`/`limit`/`reverse`
//! parameters of a `list()` call into one half-open byte range `[start, end)`,
//! or proves that the range is empty so the caller can answer without asking
//! the cache engine.
//!
//! Keys compare as raw bytes, so embedded zero bytes are ordinary content.
//! Two derived keys matter:
//!
//! - the immediate successor of `k` is `k ++ [0x00]`, which turns an exclusive `start_after` into
//!   an inclusive `start`;
//! - the first key after every key beginning with `p` is `p` with trailing `0xFF` bytes removed and
//!   the new last byte incremented. A prefix made only of `0xFF` bytes has no such key: it already
//!   reaches the top of the key space.

use crate::{error::StorageError, options::ListOptions};

/// A non-empty range to issue to the cache engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub start: Vec<u8>,
    /// Exclusive upper bound; `None` means the top of the key space.
    pub end: Option<Vec<u8>>,
    /// Scan direction.
    pub reverse: bool,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

/// Outcome of compiling list parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledRange {
    /// Scan this range.
    Scan(KeyRange),
    /// No key can satisfy the parameters.
    Empty,
}

impl CompiledRange {
    /// Returns `true` if no engine call is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Returns the immediate lexicographic successor of `key`.
#[must_use]
pub fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

/// Returns the first key that sorts after every key beginning with `prefix`.
///
/// Returns `None` when `prefix` is empty or made only of `0xFF` bytes.
#[must_use]
pub fn key_after_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let last = prefix.iter().rposition(|&b| b != 0xFF)?;
    let mut bound = prefix[..=last].to_vec();
    bound[last] += 1;
    Some(bound)
}

/// Compiles list options into a range.
///
/// # Errors
///
/// Returns a usage error if both `start` and `start_after` are given, or if
/// `limit` is not positive.
pub fn compile(options: &ListOptions) -> Result<CompiledRange, StorageError> {
    if options.start.is_some() && options.start_after.is_some() {
        return Err(StorageError::invalid_argument(
            "list() cannot be called with both start and startAfter values.",
        ));
    }

    let mut start = match (&options.start, &options.start_after) {
        (Some(start), None) => start.clone(),
        (None, Some(after)) => key_successor(after),
        _ => Vec::new(),
    };
    let mut end = options.end.clone();

    let limit = match options.limit {
        Some(limit) if limit <= 0 => {
            return Err(StorageError::invalid_argument("List limit must be positive."));
        },
        Some(limit) => Some(usize::try_from(limit).unwrap_or(usize::MAX)),
        None => None,
    };

    if let Some(prefix) = options.prefix.as_deref().filter(|p| !p.is_empty()) {
        if start.as_slice() < prefix {
            start = prefix.to_vec();
        } else if !start.starts_with(prefix) {
            // `start` is already past every key with this prefix.
            return Ok(CompiledRange::Empty);
        }

        if let Some(after_prefix) = key_after_prefix(prefix) {
            let clamp_end = match end.as_deref() {
                Some(e) if e <= prefix => return Ok(CompiledRange::Empty),
                Some(e) => !e.starts_with(prefix),
                None => true,
            };
            if clamp_end {
                end = Some(after_prefix);
            }
        }
    }

    if let Some(e) = &end {
        if *e <= start {
            return Ok(CompiledRange::Empty);
        }
    }

    Ok(CompiledRange::Scan(KeyRange { start, end, reverse: options.reverse(), limit }))
}
