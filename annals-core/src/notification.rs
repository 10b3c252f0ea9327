//! Pull-based propagation of recorded events.
//!
//! The [`NotificationLog`] presents all recorded events across aggregates as
//! contiguous sections addressed by `"start,end"` identifiers, and the
//! [`NotificationLogReader`] turns that paged view into a lazy stream.
//! Propagation is pull-only: followers read sections (or the stream), track
//! the highest id they have processed, and resume from there. Because
//! notification ids are dense, observing id `k` means ids `1..k` have all
//! been observable.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_core::Stream;
use thiserror::Error;

use crate::recorder::{Notification, Recorder, RecorderError};

/// Default number of notifications per section and per reader page.
pub const DEFAULT_SECTION_SIZE: usize = 10;

/// Error from notification log access.
#[derive(Debug, Error)]
pub enum NotificationLogError {
    /// The section identifier is not of the form `"start,end"` with
    /// `1 <= start <= end`.
    #[error("malformed section id `{0}`, expected \"start,end\" with 1 <= start <= end")]
    MalformedSectionId(String),
    /// The recorder failed.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// A contiguous range of notifications.
///
/// `id` is `None` when the requested range holds no notifications. A
/// trailing section may be partial; `next_id` is populated only when the
/// section is full, pointing at the following range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// `"first,last"` of the items actually returned.
    pub id: Option<String>,
    /// The notifications of this section, ordered by id.
    pub items: Vec<Notification>,
    /// Identifier of the next section, when this one is full.
    pub next_id: Option<String>,
}

/// Paged, ordered, gapless view of all recorded events.
///
/// Cheap to clone; clones share the recorder.
pub struct NotificationLog<R> {
    recorder: Arc<R>,
    section_size: usize,
}

impl<R> Clone for NotificationLog<R> {
    fn clone(&self) -> Self {
        Self {
            recorder: Arc::clone(&self.recorder),
            section_size: self.section_size,
        }
    }
}

impl<R: Recorder> NotificationLog<R> {
    #[must_use]
    pub fn new(recorder: Arc<R>) -> Self {
        Self {
            recorder,
            section_size: DEFAULT_SECTION_SIZE,
        }
    }

    /// Cap sections at `size` notifications.
    #[must_use]
    pub const fn with_section_size(mut self, size: usize) -> Self {
        self.section_size = size;
        self
    }

    /// Read the section addressed by `section_id`.
    ///
    /// The requested range is capped at the configured section size. Fewer
    /// recorded notifications than requested yield a partial section without
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationLogError::MalformedSectionId`] for identifiers
    /// that do not parse, and recorder errors otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn section(&self, section_id: &str) -> Result<Section, NotificationLogError> {
        let (start, end) = parse_section_id(section_id)?;
        let requested = usize::try_from(end - start + 1)
            .unwrap_or(usize::MAX)
            .min(self.section_size);

        let items = self.recorder.select_notifications(start, requested).await?;

        let id = match (items.first(), items.last()) {
            (Some(first), Some(last)) => Some(format!("{},{}", first.id, last.id)),
            _ => None,
        };
        let next_id = (items.len() == requested && !items.is_empty()).then(|| {
            let next_start = items[items.len() - 1].id + 1;
            format!("{},{}", next_start, next_start + self.section_size as u64 - 1)
        });

        Ok(Section { id, items, next_id })
    }

    /// The highest assigned notification id, or 0 when nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns a recorder error when the underlying store fails.
    pub async fn max_notification_id(&self) -> Result<u64, NotificationLogError> {
        Ok(self.recorder.max_notification_id().await?)
    }
}

fn parse_section_id(section_id: &str) -> Result<(u64, u64), NotificationLogError> {
    let malformed = || NotificationLogError::MalformedSectionId(section_id.to_string());
    let (start, end) = section_id.split_once(',').ok_or_else(malformed)?;
    let start: u64 = start.trim().parse().map_err(|_| malformed())?;
    let end: u64 = end.trim().parse().map_err(|_| malformed())?;
    if start < 1 || end < start {
        return Err(malformed());
    }
    Ok((start, end))
}

/// Reads the notification log as a lazy, ordered stream.
///
/// Cheap to clone; clones share the recorder.
pub struct NotificationLogReader<R> {
    recorder: Arc<R>,
    page_size: usize,
}

impl<R> Clone for NotificationLogReader<R> {
    fn clone(&self) -> Self {
        Self {
            recorder: Arc::clone(&self.recorder),
            page_size: self.page_size,
        }
    }
}

impl<R> NotificationLogReader<R>
where
    R: Recorder + 'static,
{
    #[must_use]
    pub fn new(recorder: Arc<R>) -> Self {
        Self {
            recorder,
            page_size: DEFAULT_SECTION_SIZE,
        }
    }

    /// Fetch `size` notifications per page.
    #[must_use]
    pub const fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Stream notifications with `id >= start` in increasing order, fetching
    /// pages on demand.
    ///
    /// The stream terminates once it is caught up (a short page). Reading is
    /// restartable: call `read` again with a new start to resume.
    #[must_use]
    pub fn read(&self, start: u64) -> NotificationStream<R> {
        NotificationStream {
            recorder: Arc::clone(&self.recorder),
            page_size: self.page_size,
            next_start: start.max(1),
            buffer: VecDeque::new(),
            fetch: None,
            done: false,
        }
    }
}

type PageFuture = Pin<Box<dyn Future<Output = Result<Vec<Notification>, RecorderError>> + Send>>;

/// Lazy sequence of notifications returned by
/// [`NotificationLogReader::read`].
pub struct NotificationStream<R> {
    recorder: Arc<R>,
    page_size: usize,
    next_start: u64,
    buffer: VecDeque<Notification>,
    fetch: Option<PageFuture>,
    done: bool,
}

impl<R> Stream for NotificationStream<R>
where
    R: Recorder + 'static,
{
    type Item = Result<Notification, RecorderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(notification) = this.buffer.pop_front() {
                return Poll::Ready(Some(Ok(notification)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            if this.fetch.is_none() {
                let recorder = Arc::clone(&this.recorder);
                let start = this.next_start;
                let limit = this.page_size;
                this.fetch = Some(Box::pin(async move {
                    recorder.select_notifications(start, limit).await
                }));
            }
            let fetch = this.fetch.as_mut().expect("fetch future just installed");

            match fetch.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(page)) => {
                    this.fetch = None;
                    if page.len() < this.page_size {
                        // Caught up; drain what we have and stop.
                        this.done = true;
                    }
                    if let Some(last) = page.last() {
                        this.next_start = last.id + 1;
                    }
                    this.buffer.extend(page);
                }
                Poll::Ready(Err(err)) => {
                    this.fetch = None;
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }
}
