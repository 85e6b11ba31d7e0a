//! Offset pagination for list queries

use serde::{Deserialize, Serialize};

/// Requested page (0-indexed) and page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// SQL `OFFSET`
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.page_size)
    }

    /// SQL `LIMIT`
    pub fn limit(&self) -> u32 {
        self.page_size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 50)
    }
}

/// One page of results plus the overall count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows across all pages
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// ```
    /// use core_library::repositories::{Page, PageRequest};
    ///
    /// let page = Page::new(vec!["p1", "p2"], 25, PageRequest::new(0, 10));
    /// assert_eq!(page.total_pages, 3);
    /// assert!(page.has_next());
    /// ```
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let total_pages = match request.page_size {
            0 => 0,
            size => total.div_ceil(u64::from(size)) as u32,
        };

        Self {
            items,
            total,
            page: request.page,
            total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page + 1 < self.total_pages
    }
}
