use relaylock_core::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use serde::{Deserialize, Serialize};

/// Page request
///
/// Pages start at 1. The limit is clamped to `1..=MAX_PAGE_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Pagination {
    /// Create a normalized page request
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    /// Row offset of the first item
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

/// One page of results with navigation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total_results: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> Page<T> {
    /// Build the envelope for `items` taken from `total_results` rows
    pub fn new(items: Vec<T>, pagination: Pagination, total_results: u64) -> Self {
        let limit = u64::from(pagination.limit);
        let total_pages = total_results.div_ceil(limit);
        let page = u64::from(pagination.page);

        Self {
            items,
            page: pagination.page,
            limit: pagination.limit,
            total_results,
            total_pages,
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 10, 1, 10)]
    #[case(3, 0, 3, 1)]
    #[case(2, 500, 2, 100)]
    fn test_pagination_normalized(
        #[case] page: u32,
        #[case] limit: u32,
        #[case] expected_page: u32,
        #[case] expected_limit: u32,
    ) {
        let p = Pagination::new(page, limit);
        assert_eq!(p.page, expected_page);
        assert_eq!(p.limit, expected_limit);
    }

    #[test]
    fn test_offset() {
        assert_eq!(Pagination::new(1, 10).offset(), 0);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
    }

    #[rstest]
    #[case(1, 25, 3, true, false)]
    #[case(2, 25, 3, true, true)]
    #[case(3, 25, 3, false, true)]
    #[case(1, 0, 0, false, false)]
    fn test_page_envelope(
        #[case] page: u32,
        #[case] total: u64,
        #[case] total_pages: u64,
        #[case] has_next: bool,
        #[case] has_previous: bool,
    ) {
        let envelope: Page<()> = Page::new(Vec::new(), Pagination::new(page, 10), total);
        assert_eq!(envelope.total_pages, total_pages);
        assert_eq!(envelope.has_next_page, has_next);
        assert_eq!(envelope.has_previous_page, has_previous);
    }
}
