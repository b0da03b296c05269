//! Async Streaming Regrouping
//!
//! The same regrouping as [`GroupedBatchReader`](crate::GroupedBatchReader),
//! driven by polling an async stream of record batches instead of a blocking
//! reader. The upstream is only polled while the smallest pooled group may
//! still grow.
//!
//! # Example
//!
//! ```rust,no_run
//! use regroup::streaming::{GroupedBatchStream, MemoryStream, StreamExt};
//!
//! async fn example(input: MemoryStream) -> regroup::Result<()> {
//!     let mut groups = GroupedBatchStream::new(input, "key");
//!
//!     while let Some(batch) = groups.next().await {
//!         let batch = batch?;
//!         println!("Got group with {} rows", batch.num_rows());
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use futures::ready;
use futures::stream::Stream;
use pin_project_lite::pin_project;
use tracing::trace;

use crate::error::Result;
use crate::rebuffer::{Rebuffer, RegroupOptions};

// Re-export for convenience
pub use futures::StreamExt;

/// A stream of RecordBatches that can be sent across threads.
pub type SendableRecordBatchStream = Pin<Box<dyn RecordBatchStream + Send>>;

/// Trait for async streams of RecordBatches.
pub trait RecordBatchStream: Stream<Item = Result<RecordBatch>> {
    /// Returns the schema of the stream.
    fn schema(&self) -> SchemaRef;
}

impl RecordBatchStream for SendableRecordBatchStream {
    fn schema(&self) -> SchemaRef {
        self.as_ref().get_ref().schema()
    }
}

pin_project! {
    /// A simple stream that wraps a vector of RecordBatches.
    pub struct MemoryStream {
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        index: usize,
    }
}

impl MemoryStream {
    /// Create a new MemoryStream from batches.
    pub fn new(batches: Vec<RecordBatch>, schema: SchemaRef) -> Self {
        Self {
            schema,
            batches,
            index: 0,
        }
    }

    /// Create an empty stream with the given schema.
    pub fn empty(schema: SchemaRef) -> Self {
        Self::new(vec![], schema)
    }
}

impl Stream for MemoryStream {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.index < this.batches.len() {
            let batch = this.batches[*this.index].clone();
            *this.index += 1;
            Poll::Ready(Some(Ok(batch)))
        } else {
            Poll::Ready(None)
        }
    }
}

impl RecordBatchStream for MemoryStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

pin_project! {
    /// A stream yielding one batch per key of the grouping column, in ascending
    /// key order.
    ///
    /// Upstream errors pass through unchanged and leave the stream usable.
    pub struct GroupedBatchStream<S> {
        #[pin]
        input: S,
        rebuffer: Rebuffer,
    }
}

impl<S: RecordBatchStream> GroupedBatchStream<S> {
    /// Regroup `input` on the column named `group_field`.
    pub fn new(input: S, group_field: impl Into<String>) -> Self {
        Self::with_options(input, group_field, RegroupOptions::default())
    }

    /// Regroup `input` with custom options.
    pub fn with_options(input: S, group_field: impl Into<String>, options: RegroupOptions) -> Self {
        let rebuffer = Rebuffer::new(input.schema(), group_field, options);
        Self { input, rebuffer }
    }

    /// The underlying state machine, for inspecting pool state.
    pub fn rebuffer(&self) -> &Rebuffer {
        &self.rebuffer
    }
}

impl<S: RecordBatchStream> Stream for GroupedBatchStream<S> {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if this.rebuffer.is_finished() {
            return Poll::Ready(None);
        }

        while this.rebuffer.needs_input() {
            let pulled = match ready!(this.input.as_mut().poll_next(cx)) {
                Some(Ok(batch)) => Some(batch),
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => None,
            };
            trace!(
                rows = ?pulled.as_ref().map(|b| b.num_rows()),
                pooled = this.rebuffer.pooled_groups(),
                "polled upstream batch"
            );
            match this.rebuffer.push(pulled) {
                Ok(Some(last)) => return Poll::Ready(Some(Ok(last))),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
        }

        Poll::Ready(this.rebuffer.pop().transpose())
    }
}

impl<S: RecordBatchStream> RecordBatchStream for GroupedBatchStream<S> {
    fn schema(&self) -> SchemaRef {
        self.rebuffer.schema()
    }
}
