//! Shared "HTTP request in progress" flag driving the full-screen loading overlay.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::watch;

#[derive(Clone)]
pub struct LoadingState {
    inner: Arc<LoadingInner>,
}

struct LoadingInner {
    in_flight: AtomicUsize,
    flag: watch::Sender<bool>,
}

impl LoadingState {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(LoadingInner {
                in_flight: AtomicUsize::new(0),
                flag,
            }),
        }
    }

    /// Forces the overlay flag, ignoring requests tracked through [`LoadingState::begin`].
    pub fn set_loading(&self, loading: bool) {
        self.inner.flag.send_replace(loading);
    }

    pub fn is_http_loading(&self) -> bool {
        *self.inner.flag.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.flag.subscribe()
    }

    /// Raises the overlay until the returned guard is dropped. Overlapping
    /// requests keep it raised until the last one finishes.
    pub fn begin(&self) -> LoadingGuard {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.inner.flag.send_replace(true);
        LoadingGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for LoadingState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoadingGuard {
    inner: Arc<LoadingInner>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.flag.send_replace(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_lowers_flag_on_drop() {
        let loading = LoadingState::new();
        let guard = loading.begin();
        assert!(loading.is_http_loading());
        drop(guard);
        assert!(!loading.is_http_loading());
    }

    #[test]
    fn overlapping_guards_keep_flag_until_last_drop() {
        let loading = LoadingState::new();
        let first = loading.begin();
        let second = loading.begin();
        drop(first);
        assert!(loading.is_http_loading());
        drop(second);
        assert!(!loading.is_http_loading());
    }

    #[test]
    fn clones_share_the_same_flag() {
        let loading = LoadingState::new();
        let observer = loading.clone();
        let rx = observer.subscribe();
        loading.set_loading(true);
        assert!(observer.is_http_loading());
        assert!(*rx.borrow());
    }
}
