//! Prefix windowing over an already fetched collection.

/// End index of the window after `pages` pages have been revealed.
pub fn window_end(pages: usize, page_size: usize, total: usize) -> usize {
    pages.saturating_mul(page_size.max(1)).min(total)
}

/// Number of pages needed to reveal all `total` items.
pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1))
}

/// A fully fetched collection plus how many pages of it are revealed.
///
/// The window is always re-derived as a prefix of `all`; it is never stored.
#[derive(Debug, Clone)]
pub struct PagedCollection<T> {
    all: Vec<T>,
    pages: usize,
    page_size: usize,
}

impl<T> PagedCollection<T> {
    pub fn new(page_size: usize) -> Self {
        Self {
            all: Vec::new(),
            pages: 0,
            page_size: page_size.max(1),
        }
    }

    /// Replaces the collection and reveals its first page.
    pub fn reset(&mut self, all: Vec<T>) {
        self.pages = usize::from(!all.is_empty());
        self.all = all;
    }

    pub fn clear(&mut self) {
        self.all.clear();
        self.pages = 0;
    }

    /// Reveals one more page and returns how many items became visible.
    pub fn advance(&mut self) -> usize {
        let before = self.window_len();
        if before >= self.all.len() {
            return 0;
        }
        self.pages += 1;
        self.window_len() - before
    }

    pub fn window(&self) -> &[T] {
        &self.all[..self.window_len()]
    }

    pub fn window_len(&self) -> usize {
        window_end(self.pages, self.page_size, self.all.len())
    }

    pub fn all(&self) -> &[T] {
        &self.all
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn has_more(&self) -> bool {
        self.pages < page_count(self.all.len(), self.page_size)
    }
}
