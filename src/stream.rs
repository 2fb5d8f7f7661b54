// 🔁 Record Stream - one lazy sequence of persons over many pages
//
// Pull-based: nothing is fetched until the caller asks for the next person.
// The only suspension point is the page boundary, so the cursor below is
// the whole state of the iteration.

use crate::division::{CodeTable, DivisionResolver};
use crate::error::{FetchError, HarvestError};
use crate::fetcher::{PagedFetcher, RawRecord, CAPACITY};
use crate::person::Person;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared flag checked between page fetches.
///
/// A page fetch is atomic, so cancelling mid-page only takes effect once the
/// records already fetched have been handed out.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// POLICY + CURSOR
// ============================================================================

/// When the stream considers the source exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Stop after a page that returned fewer records than `page_size`
    #[default]
    StopOnShortPage,

    /// Keep requesting until the page-count bound, even through empty pages
    PageBound,
}

impl std::str::FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "stop_on_short_page" | "short_page" => Ok(ExhaustionPolicy::StopOnShortPage),
            "page_bound" => Ok(ExhaustionPolicy::PageBound),
            other => Err(format!("unknown exhaustion policy: {}", other)),
        }
    }
}

/// Position of the stream: the page being read and the next record in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub page_number: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Running,
    FetchFailed,
    Finished,
}

/// Number of pages the capacity allows for a page size: `floor(CAPACITY / page_size)`.
///
/// Page numbers are requested while strictly below this bound.
pub fn page_bound(page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    (CAPACITY / u64::from(page_size)) as u32
}

// ============================================================================
// RECORD STREAM
// ============================================================================

/// Iterator of `Result<Person, HarvestError>` across successive pages.
///
/// Finite and not restartable. After a fetch error the stream yields `None`
/// until `resume()` retries the same page. A decode error ends the stream
/// for good: records of a page are never skipped.
///
/// No deduplication across pages; source ordering is assumed stable.
pub struct RecordStream<'a, T: Transport, C: CodeTable> {
    fetcher: &'a PagedFetcher<T>,
    resolver: &'a DivisionResolver<C>,
    page_size: u32,
    step_over_pages: u32,
    page_bound: u32,
    policy: ExhaustionPolicy,
    cancel: CancelToken,

    cursor: Cursor,
    page: Option<Vec<RawRecord>>,
    state: StreamState,
    pages_fetched: u32,
    persons_yielded: usize,
}

/// Build a stream over `fetcher`, resolving each person against `resolver`.
///
/// `step_over_pages` of 0 is treated as 1. Fails only on a zero `page_size`.
pub fn produce_entities<'a, T: Transport, C: CodeTable>(
    fetcher: &'a PagedFetcher<T>,
    resolver: &'a DivisionResolver<C>,
    page_size: u32,
    step_over_pages: u32,
) -> Result<RecordStream<'a, T, C>, FetchError> {
    RecordStream::new(fetcher, resolver, page_size, step_over_pages)
}

impl<'a, T: Transport, C: CodeTable> RecordStream<'a, T, C> {
    pub fn new(
        fetcher: &'a PagedFetcher<T>,
        resolver: &'a DivisionResolver<C>,
        page_size: u32,
        step_over_pages: u32,
    ) -> Result<Self, FetchError> {
        if page_size == 0 {
            return Err(FetchError::InvalidPage {
                page_number: 1,
                page_size,
            });
        }

        Ok(RecordStream {
            fetcher,
            resolver,
            page_size,
            step_over_pages: step_over_pages.max(1),
            page_bound: page_bound(page_size),
            policy: ExhaustionPolicy::default(),
            cancel: CancelToken::new(),
            cursor: Cursor {
                page_number: 1,
                offset: 0,
            },
            page: None,
            state: StreamState::Running,
            pages_fetched: 0,
            persons_yielded: 0,
        })
    }

    /// Builder pattern: choose the exhaustion policy
    pub fn with_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder pattern: attach a cancellation token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builder pattern: start from a later page (e.g. a cursor saved earlier)
    pub fn starting_at(mut self, page_number: u32) -> Self {
        self.cursor = Cursor {
            page_number: page_number.max(1),
            offset: 0,
        };
        self.page = None;
        self
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn page_bound(&self) -> u32 {
        self.page_bound
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn persons_yielded(&self) -> usize {
        self.persons_yielded
    }

    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    /// Retry the page whose fetch failed.
    /// Returns false when the stream is not stopped on a fetch failure.
    pub fn resume(&mut self) -> bool {
        if self.state == StreamState::FetchFailed {
            self.state = StreamState::Running;
            true
        } else {
            false
        }
    }

    fn finish(&mut self, reason: &str) {
        if self.state != StreamState::Finished {
            info!(
                reason,
                pages = self.pages_fetched,
                persons = self.persons_yielded,
                "record stream finished"
            );
        }
        self.state = StreamState::Finished;
    }

    /// Move to the next page once the current one is drained.
    /// Returns false when the stream is over.
    fn advance_page(&mut self) -> bool {
        let Some(page) = self.page.take() else {
            return true;
        };

        if self.policy == ExhaustionPolicy::StopOnShortPage && page.len() < self.page_size as usize {
            debug!(
                page_number = self.cursor.page_number,
                records = page.len(),
                "short page, source exhausted"
            );
            self.finish("short page");
            return false;
        }

        match self.cursor.page_number.checked_add(self.step_over_pages) {
            Some(next) => {
                self.cursor = Cursor {
                    page_number: next,
                    offset: 0,
                };
                true
            }
            None => {
                self.finish("page number overflow");
                false
            }
        }
    }
}

impl<'a, T: Transport, C: CodeTable> Iterator for RecordStream<'a, T, C> {
    type Item = Result<Person, HarvestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state != StreamState::Running {
                return None;
            }

            // 1. Hand out the next record of the loaded page
            if let Some(raw) = self
                .page
                .as_ref()
                .and_then(|page| page.get(self.cursor.offset))
            {
                let offset = self.cursor.offset;
                self.cursor.offset += 1;

                return match Person::from_raw(raw, self.resolver) {
                    Ok(person) => {
                        self.persons_yielded += 1;
                        Some(Ok(person))
                    }
                    Err(source) => {
                        self.finish("decode failure");
                        Some(Err(HarvestError::Decode {
                            page_number: self.cursor.page_number,
                            offset,
                            source,
                        }))
                    }
                };
            }

            // 2. Page drained (or none loaded yet): page boundary
            if !self.advance_page() {
                return None;
            }

            if self.cursor.page_number >= self.page_bound {
                self.finish("page bound reached");
                return None;
            }

            if self.cancel.is_cancelled() {
                self.finish("cancelled");
                return None;
            }

            // 3. Fetch the page under the cursor
            match self
                .fetcher
                .fetch_page(self.cursor.page_number, self.page_size)
            {
                Ok(records) => {
                    self.pages_fetched += 1;
                    self.page = Some(records);
                }
                Err(source) => {
                    self.state = StreamState::FetchFailed;
                    return Some(Err(HarvestError::Fetch {
                        page_number: self.cursor.page_number,
                        source,
                    }));
                }
            }
        }
    }
}

impl<'a, T: Transport, C: CodeTable> std::fmt::Debug for RecordStream<'a, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("page_size", &self.page_size)
            .field("step_over_pages", &self.step_over_pages)
            .field("page_bound", &self.page_bound)
            .field("policy", &self.policy)
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("pages_fetched", &self.pages_fetched)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
