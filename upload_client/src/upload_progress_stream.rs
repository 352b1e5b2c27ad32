use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use more_asserts::*;

use crate::constants::UPLOAD_REPORTING_BLOCK_SIZE;

type UpdateFunction = Box<dyn Fn(u64, u64) + Send + Sync + 'static>;

struct ProgressReporter {
    update_fn: UpdateFunction,
    bytes_sent_already_reported: AtomicU64,
}

impl ProgressReporter {
    fn update(&self, new_completed: u64) {
        // Only report forward movement, so a restarted stream never reports the same bytes twice.
        let old_completed = self.bytes_sent_already_reported.fetch_max(new_completed, Ordering::Relaxed);

        if old_completed < new_completed {
            (self.update_fn)(new_completed - old_completed, new_completed);
        }
    }
}

/// Streams an in-memory body in fixed blocks, reporting the bytes handed to the HTTP stack.
///
/// The callback receives `(delta, completed)` each time a block is handed out.
pub struct UploadProgressStream {
    data: Bytes,
    reporter: ProgressReporter,
    bytes_sent: u64,
    block_size: u64,
}

impl Stream for UploadProgressStream {
    type Item = std::result::Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        debug_assert_le!(self.bytes_sent, self.data.len() as u64);

        if self.bytes_sent == self.data.len() as u64 {
            return Poll::Ready(None);
        }

        let slice_start = self.bytes_sent;
        let slice_end = (self.bytes_sent + self.block_size).min(self.data.len() as u64);

        // The HTTP stack may stop polling once the declared length is written, so a block
        // counts as sent as soon as it is handed out.
        self.reporter.update(slice_end);
        self.bytes_sent = slice_end;

        Poll::Ready(Some(Ok(self.data.slice((slice_start as usize)..(slice_end as usize)))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() as u64 - self.bytes_sent).div_ceil(self.block_size) as usize;
        (remaining, Some(remaining))
    }
}

impl UploadProgressStream {
    pub fn new(
        data: impl Into<Bytes>,
        update_fn: impl Fn(u64, u64) + Send + Sync + 'static,
        fixed_block_size: Option<u64>,
    ) -> Self {
        Self {
            data: data.into(),
            reporter: ProgressReporter {
                update_fn: Box::new(update_fn),
                bytes_sent_already_reported: 0.into(),
            },
            bytes_sent: 0,
            block_size: fixed_block_size.unwrap_or(*UPLOAD_REPORTING_BLOCK_SIZE).max(1),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
