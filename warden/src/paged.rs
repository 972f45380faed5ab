//! Chunked iteration over store searches
//!
//! Every sweep follows the same shape: fetch a bounded chunk of matching
//! entries, act on each one independently, and continue from where the
//! chunk ended until a chunk comes back empty or reports no continuation.

use std::{error, future::Future};

use crate::store::{Entry, PageRequest, Query, Store, StoreExt};

/// The default number of entries fetched per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// What a sweep did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct SweepReport {
    /// The number of chunks fetched
    pub fetches: usize,
    /// The number of entries acted on successfully
    pub processed: usize,
    /// The number of entries whose action failed
    pub failed: usize,
    /// Whether a fetch failed, ending the sweep early
    pub aborted: bool,
}

impl SweepReport {
    /// Folds another report into this one
    pub fn absorb(&mut self, other: SweepReport) {
        self.fetches += other.fetches;
        self.processed += other.processed;
        self.failed += other.failed;
        self.aborted |= other.aborted;
    }
}

/// A search walked in bounded chunks
#[derive(Debug)]
#[must_use]
pub struct PagedQuery<'a, S: ?Sized> {
    store: &'a S,
    query: Query,
    chunk_size: usize,
}

impl<'a, S: Store + ?Sized> PagedQuery<'a, S> {
    /// Prepares a sweep of `query`, fetching at most `chunk_size` entries at a time
    ///
    /// A chunk size of zero falls back to [`DEFAULT_CHUNK_SIZE`].
    pub fn new(store: &'a S, query: Query, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };

        Self {
            store,
            query,
            chunk_size,
        }
    }

    /// Runs `action` on every matching entry
    ///
    /// A failing action is logged and counted, and the sweep moves on. A
    /// failing fetch ends the sweep, which is then reported as aborted.
    pub async fn for_each<T, F, Fut, E>(self, mut action: F) -> SweepReport
    where
        T: Entry,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: error::Error + 'static,
    {
        let mut report = SweepReport::default();
        let mut cursor = None;

        loop {
            let page = match self
                .store
                .search::<T>(
                    &self.query,
                    PageRequest {
                        cursor: cursor.take(),
                        size: self.chunk_size,
                    },
                )
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    let error: &dyn error::Error = &err;
                    tracing::error!(
                        store.base = %self.query.base,
                        store.object_class = self.query.object_class,
                        error,
                        "chunk fetch failed; ending sweep"
                    );
                    report.aborted = true;
                    break;
                }
            };
            report.fetches += 1;

            if page.entries.is_empty() {
                break;
            }

            for entry in page.entries {
                let dn = entry.dn().to_owned();
                match action(entry).await {
                    Ok(()) => report.processed += 1,
                    Err(err) => {
                        let error: &dyn error::Error = &err;
                        tracing::warn!(store.dn = %dn, error, "failed to process entry");
                        report.failed += 1;
                    }
                }
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        report
    }

    /// Removes every matching entry
    pub async fn remove_all<T: Entry>(self) -> SweepReport {
        let store = self.store;
        self.for_each(|entry: T| async move { store.remove(entry.dn()).await })
            .await
    }
}
