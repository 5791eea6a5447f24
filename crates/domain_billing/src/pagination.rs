//! Keyset (cursor) pagination over `(created_at, id)`
//!
//! Lists are ordered newest first. A cursor names the last row a client has
//! seen; the next page is everything strictly older than it and the previous
//! page everything strictly newer. Offsets are never used, so inserts
//! between requests neither duplicate nor skip rows.
//!
//! ```text
//!   newest ──────────────────────────────────────────────▶ oldest
//!   [ prev page ]  cursor  [ next page ]
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BillingError;

/// Upper bound on a page size unless configured otherwise
pub const DEFAULT_MAX_LIMIT: u32 = 100;

/// Page size used when a request names none
pub const DEFAULT_LIMIT: u32 = 20;

/// Position of one row in the `(created_at, id)` ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: impl Into<Uuid>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }

    /// Opaque string form: `"<RFC3339 created_at>|<uuid>"`
    pub fn encode(&self) -> String {
        format!(
            "{}|{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.id
        )
    }

    /// Parses the string produced by [`Cursor::encode`]
    pub fn parse(raw: &str) -> Result<Self, BillingError> {
        let (timestamp, id) = raw
            .split_once('|')
            .ok_or_else(|| BillingError::InvalidCursor(format!("missing separator in '{}'", raw)))?;

        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| BillingError::InvalidCursor(format!("bad timestamp '{}': {}", timestamp, e)))?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id)
            .map_err(|e| BillingError::InvalidCursor(format!("bad id '{}': {}", id, e)))?;

        Ok(Self { created_at, id })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cursor::parse(s)
    }
}

/// Which way to move from the cursor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Older rows
    #[default]
    Next,
    /// Newer rows
    Prev,
}

impl FromStr for Direction {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "next" | "forward" => Ok(Direction::Next),
            "prev" | "previous" | "backward" => Ok(Direction::Prev),
            other => Err(BillingError::validation(format!("unknown direction '{}'", other))),
        }
    }
}

/// A client's page request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    #[serde(default)]
    pub direction: Direction,
}

impl PageRequest {
    /// First page with the given size
    pub fn first(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn next(limit: u32, cursor: impl Into<String>) -> Self {
        Self {
            limit: Some(limit),
            cursor: Some(cursor.into()),
            direction: Direction::Next,
        }
    }

    pub fn prev(limit: u32, cursor: impl Into<String>) -> Self {
        Self {
            limit: Some(limit),
            cursor: Some(cursor.into()),
            direction: Direction::Prev,
        }
    }

    /// Decodes the cursor and clamps the limit into `[1, max_limit]`
    ///
    /// `Prev` without a cursor is the first page.
    pub fn resolve(&self, max_limit: u32) -> Result<Seek, BillingError> {
        let max_limit = max_limit.max(1);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT.min(max_limit)).clamp(1, max_limit);
        let anchor = self.cursor.as_deref().map(Cursor::parse).transpose()?;
        let direction = if anchor.is_none() { Direction::Next } else { self.direction };

        Ok(Seek {
            anchor,
            direction,
            limit: limit as usize,
        })
    }
}

/// A resolved keyset query
///
/// Sources return up to [`Seek::fetch_size`] rows in seek order: descending
/// for `Next` (rows older than the anchor), ascending for `Prev` (rows newer
/// than the anchor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seek {
    pub anchor: Option<Cursor>,
    pub direction: Direction,
    pub limit: usize,
}

impl Seek {
    /// Rows to fetch: one extra to detect another page
    pub fn fetch_size(&self) -> usize {
        self.limit + 1
    }

    /// True if a row at `position` lies on the requested side of the anchor
    pub fn admits(&self, position: &Cursor) -> bool {
        match (self.anchor, self.direction) {
            (None, _) => true,
            (Some(anchor), Direction::Next) => *position < anchor,
            (Some(anchor), Direction::Prev) => *position > anchor,
        }
    }
}

/// Anything that has a position in the keyset ordering
pub trait KeysetItem {
    fn cursor(&self) -> Cursor;
}

/// A list that can be read one seek at a time
#[async_trait]
pub trait KeysetSource: Send + Sync {
    type Item: KeysetItem + Send;

    async fn fetch(&self, seek: &Seek) -> Result<Vec<Self::Item>, BillingError>;
}

/// One page of results plus navigation metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next_page: false,
            has_previous_page: false,
            start_cursor: None,
            end_cursor: None,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
            start_cursor: self.start_cursor,
            end_cursor: self.end_cursor,
        }
    }
}

/// Builds pages from keyset sources
#[derive(Debug, Clone, Copy)]
pub struct CursorPaginator {
    max_limit: u32,
}

impl Default for CursorPaginator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LIMIT)
    }
}

impl CursorPaginator {
    pub fn new(max_limit: u32) -> Self {
        Self {
            max_limit: max_limit.max(1),
        }
    }

    pub fn max_limit(&self) -> u32 {
        self.max_limit
    }

    /// Fetches one page from `source`
    pub async fn page<S: KeysetSource>(
        &self,
        source: &S,
        request: &PageRequest,
    ) -> Result<Page<S::Item>, BillingError> {
        let seek = request.resolve(self.max_limit)?;
        let rows = source.fetch(&seek).await?;
        Ok(Self::assemble(&seek, rows))
    }

    /// Turns the rows of one seek into a page in display order
    pub fn assemble<T: KeysetItem>(seek: &Seek, mut rows: Vec<T>) -> Page<T> {
        let has_extra = rows.len() > seek.limit;
        rows.truncate(seek.limit);

        let (has_next_page, has_previous_page) = match seek.direction {
            Direction::Next => (has_extra, seek.anchor.is_some()),
            Direction::Prev => {
                rows.reverse();
                (seek.anchor.is_some(), has_extra)
            }
        };

        Page {
            start_cursor: rows.first().map(|r| r.cursor().encode()),
            end_cursor: rows.last().map(|r| r.cursor().encode()),
            items: rows,
            has_next_page,
            has_previous_page,
        }
    }
}

/// Applies a seek to an in-memory collection
///
/// Returns the same rows, in the same order, that a database source would
/// for `seek`.
pub fn paginate_slice<T: KeysetItem + Clone>(items: &[T], seek: &Seek) -> Vec<T> {
    let mut matching: Vec<&T> = items.iter().filter(|item| seek.admits(&item.cursor())).collect();

    match seek.direction {
        Direction::Next => matching.sort_by(|a, b| b.cursor().cmp(&a.cursor())),
        Direction::Prev => matching.sort_by(|a, b| a.cursor().cmp(&b.cursor())),
    }

    matching.into_iter().take(seek.fetch_size()).cloned().collect()
}
