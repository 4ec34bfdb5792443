//! Page sizing and the response envelope.

use serde::{Deserialize, Serialize};

/// Page size clamped to `1..=max`.
///
/// A request of zero is treated as no request, like an unparsable
/// `page_size` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageLimit(usize);

impl PageLimit {
    /// Clamp a requested size, falling back to `default` when absent or zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagination::PageLimit;
    ///
    /// assert_eq!(PageLimit::clamped(None, 50, 100).get(), 50);
    /// assert_eq!(PageLimit::clamped(Some(0), 50, 100).get(), 50);
    /// assert_eq!(PageLimit::clamped(Some(500), 50, 100).get(), 100);
    /// ```
    pub fn clamped(requested: Option<usize>, default: usize, max: usize) -> Self {
        let ceiling = max.max(1);
        let size = requested.filter(|&size| size > 0).unwrap_or(default);
        Self(size.clamp(1, ceiling))
    }

    /// Number of rows the caller will receive at most.
    pub const fn get(self) -> usize {
        self.0
    }

    /// Number of rows to fetch so that one extra row reveals `has_more`.
    pub const fn fetch_size(self) -> usize {
        self.0.saturating_add(1)
    }
}

/// Trim a `limit + 1` fetch down to `limit` rows.
///
/// Returns the kept rows and whether the extra row was present.
///
/// # Examples
///
/// ```
/// use pagination::{PageLimit, split_lookahead};
///
/// let (rows, has_more) = split_lookahead(vec![1, 2, 3], PageLimit::clamped(Some(2), 2, 10));
/// assert_eq!(rows, vec![1, 2]);
/// assert!(has_more);
/// ```
pub fn split_lookahead<T>(mut rows: Vec<T>, limit: PageLimit) -> (Vec<T>, bool) {
    let has_more = rows.len() > limit.get();
    rows.truncate(limit.get());
    (rows, has_more)
}

/// Paginated response envelope.
///
/// Cursors are chronological: `next_cursor` points toward later rows and
/// `prev_cursor` toward earlier rows, whichever direction produced the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    /// Rows in display order.
    pub items: Vec<T>,
    /// Effective page size.
    pub limit: usize,
    /// Whether more rows exist in the direction that produced the page.
    pub has_more: bool,
    /// Token for reading rows after this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Token for reading rows before this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,
}

impl<T> Paginated<T> {
    /// Build an envelope without cursors.
    pub const fn new(items: Vec<T>, limit: PageLimit, has_more: bool) -> Self {
        Self {
            items,
            limit: limit.get(),
            has_more,
            next_cursor: None,
            prev_cursor: None,
        }
    }

    /// Attach continuation cursors.
    #[must_use]
    pub fn with_cursors(mut self, next: Option<String>, prev: Option<String>) -> Self {
        self.next_cursor = next;
        self.prev_cursor = prev;
        self
    }

    /// An empty page.
    pub const fn empty(limit: PageLimit) -> Self {
        Self::new(Vec::new(), limit, false)
    }
}
