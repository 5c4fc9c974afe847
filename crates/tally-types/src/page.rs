use serde::{Deserialize, Serialize};

/// Bounded pagination parameters.
///
/// Out-of-range input is normalized rather than rejected: a page below 1
/// becomes 1, and a page size outside `1..=MAX_PAGE_SIZE` falls back to
/// [`PageRequest::DEFAULT_PAGE_SIZE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page: i64, page_size: i64) -> Self {
        Self::with_default_size(page, page_size, Self::DEFAULT_PAGE_SIZE)
    }

    /// Like [`PageRequest::new`] with a caller-chosen fallback size.
    pub fn with_default_size(page: i64, page_size: i64, default_size: u32) -> Self {
        let page = if page < 1 {
            1
        } else {
            u32::try_from(page).unwrap_or(u32::MAX)
        };
        let fallback = default_size.clamp(1, Self::MAX_PAGE_SIZE);
        let page_size = if (1..=i64::from(Self::MAX_PAGE_SIZE)).contains(&page_size) {
            page_size as u32
        } else {
            fallback
        };
        Self { page, page_size }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    /// Slice an already-ordered collection down to this page.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        items
            .iter()
            .skip(start)
            .take(self.page_size as usize)
            .cloned()
            .collect()
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of results plus the unpaginated total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page(),
            page_size: request.page_size(),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalizes_out_of_range_input() {
        let req = PageRequest::new(0, 0);
        assert_eq!((req.page(), req.page_size()), (1, 10));

        let req = PageRequest::new(-5, 101);
        assert_eq!((req.page(), req.page_size()), (1, 10));

        let req = PageRequest::new(3, 100);
        assert_eq!((req.page(), req.page_size()), (3, 100));
        assert_eq!(req.offset(), 200);
    }

    #[test]
    fn slice_takes_requested_window() {
        let items: Vec<u32> = (1..=25).collect();
        assert_eq!(PageRequest::new(3, 10).slice(&items), vec![21, 22, 23, 24, 25]);
        assert!(PageRequest::new(4, 10).slice(&items).is_empty());
    }

    proptest! {
        #[test]
        fn bounds_always_hold(page in any::<i64>(), size in any::<i64>()) {
            let req = PageRequest::new(page, size);
            prop_assert!(req.page() >= 1);
            prop_assert!((1..=PageRequest::MAX_PAGE_SIZE).contains(&req.page_size()));
        }
    }
}
