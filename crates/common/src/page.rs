use serde::{Deserialize, Serialize};

/// Default page size when the client does not pass `limit`.
pub const DEFAULT_LIMIT: u32 = 10;
/// Upper bound on `limit`; larger values are clamped.
pub const MAX_LIMIT: u32 = 100;

/// Validated pagination parameters.
///
/// Page numbering is 1-based. Out-of-range values are clamped rather than
/// rejected: page 0 becomes 1, limit 0 becomes 1, limit above [`MAX_LIMIT`]
/// becomes [`MAX_LIMIT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    page: u32,
    limit: u32,
}

impl PageParams {
    /// Builds parameters from optional query values, applying defaults and
    /// clamping.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Self { page, limit }
    }

    /// The 1-based page number.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// The page size.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// The row offset for this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// The SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// One page of results plus the totals the client needs for paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    /// Assembles a page from query results and the total row count.
    pub fn new(items: Vec<T>, total: u64, params: PageParams) -> Self {
        let limit = u64::from(params.limit());
        Self {
            items,
            total,
            page: params.page(),
            limit: params.limit(),
            total_pages: total.div_ceil(limit),
        }
    }

    /// Maps the items while keeping the paging totals.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}
