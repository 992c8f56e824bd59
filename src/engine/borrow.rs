//! Runtime borrow tracking for component columns.
//!
//! Every [`ArchetypeStorage`](crate::engine::storage::ArchetypeStorage) keeps
//! one [`BorrowTracker`] holding a state word per column. References handed
//! out through a shared storage ([`ComponentRef`], query items) keep a
//! [`ColumnBorrow`] alive for as long as they live, so an exclusive borrow of
//! a column never coexists with any other borrow of it.
//!
//! State encoding per column:
//! - `0`: unborrowed
//! - `1`: borrowed exclusively
//! - `n >= 2`: borrowed shared by `n - 1` holders
//!
//! Acquisition never waits. The scheduler orders systems with overlapping
//! access before their bodies run, so a conflict observed here is a
//! programmer error and the caller panics.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

const UNBORROWED: usize = 0;
const EXCLUSIVE: usize = 1;

/// Kind of access requested on a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorrowKind {
    /// Any number of concurrent readers.
    Shared,
    /// A single writer and nobody else.
    Exclusive,
}

impl fmt::Display for BorrowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowKind::Shared => f.write_str("shared"),
            BorrowKind::Exclusive => f.write_str("exclusively"),
        }
    }
}

/// Per-column borrow states of one storage.
pub(crate) struct BorrowTracker {
    states: Box<[AtomicUsize]>,
}

impl BorrowTracker {
    pub(crate) fn new(columns: usize) -> Self {
        Self { states: (0..columns).map(|_| AtomicUsize::new(UNBORROWED)).collect() }
    }

    /// Borrows `column`, or returns `None` if the request conflicts with a live borrow.
    pub(crate) fn try_borrow(&self, column: usize, kind: BorrowKind) -> Option<ColumnBorrow<'_>> {
        let acquired = match kind {
            BorrowKind::Shared => self.try_acquire_shared(column),
            BorrowKind::Exclusive => self.try_acquire_exclusive(column),
        };
        acquired.then_some(ColumnBorrow { tracker: self, column, kind })
    }

    #[cfg(test)]
    pub(crate) fn is_borrowed(&self, column: usize) -> bool {
        self.states[column].load(Ordering::Acquire) != UNBORROWED
    }

    fn try_acquire_shared(&self, column: usize) -> bool {
        let state = &self.states[column];
        let mut current = state.load(Ordering::Relaxed);
        loop {
            if current == EXCLUSIVE {
                return false;
            }
            let next = if current == UNBORROWED { 2 } else { current + 1 };
            match state.compare_exchange_weak(current, next, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn try_acquire_exclusive(&self, column: usize) -> bool {
        self.states[column]
            .compare_exchange(UNBORROWED, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release_shared(&self, column: usize) {
        let state = &self.states[column];
        let mut current = state.load(Ordering::Relaxed);
        loop {
            debug_assert!(current >= 2, "released a shared borrow that was not held");
            let next = if current == 2 { UNBORROWED } else { current - 1 };
            match state.compare_exchange_weak(current, next, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn release_exclusive(&self, column: usize) {
        let previous = self.states[column].swap(UNBORROWED, Ordering::Release);
        debug_assert_eq!(previous, EXCLUSIVE, "released an exclusive borrow that was not held");
    }
}

/// A live borrow of one column. Released on drop.
pub struct ColumnBorrow<'a> {
    tracker: &'a BorrowTracker,
    column: usize,
    kind: BorrowKind,
}

impl ColumnBorrow<'_> {
    /// Access this borrow grants.
    #[inline]
    pub fn kind(&self) -> BorrowKind { self.kind }
}

impl Drop for ColumnBorrow<'_> {
    fn drop(&mut self) {
        match self.kind {
            BorrowKind::Shared => self.tracker.release_shared(self.column),
            BorrowKind::Exclusive => self.tracker.release_exclusive(self.column),
        }
    }
}

impl fmt::Debug for ColumnBorrow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnBorrow")
            .field("column", &self.column)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A set of column borrows taken and released together.
///
/// If acquiring any member panics, the members already held are released
/// while unwinding.
#[derive(Debug, Default)]
pub(crate) struct BorrowGuard<'a> {
    borrows: Vec<ColumnBorrow<'a>>,
}

impl<'a> BorrowGuard<'a> {
    pub(crate) fn push(&mut self, borrow: ColumnBorrow<'a>) {
        self.borrows.push(borrow);
    }
}

/// Shared reference to a stored record, holding a shared borrow of its column.
///
/// While any `ComponentRef` to a column is alive, query writes to that column
/// panic instead of aliasing the reference.
pub struct ComponentRef<'a, T: ?Sized> {
    value: &'a T,
    _borrow: ColumnBorrow<'a>,
}

impl<'a, T: ?Sized> ComponentRef<'a, T> {
    pub(crate) fn new(value: &'a T, borrow: ColumnBorrow<'a>) -> Self {
        debug_assert_eq!(borrow.kind(), BorrowKind::Shared);
        Self { value, _borrow: borrow }
    }
}

impl<T: ?Sized> Deref for ComponentRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T { self.value }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ComponentRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.value, f)
    }
}
