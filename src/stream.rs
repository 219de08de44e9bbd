//! Streaming batch API: emit results as documents complete.
//!
//! ## Why stream?
//!
//! A batch of scanned invoices takes minutes. A stream-based API lets
//! callers write results to their sink incrementally, wire up progress
//! displays, or stop consuming on an operator signal instead of buffering
//! every result in memory.
//!
//! Unlike the eager [`crate::extract::Extractor::extract_batch`] which
//! returns only after the last document, [`Extractor::extract_stream`]
//! yields each [`ExtractionResult`] as its document reaches a terminal
//! state. Results arrive in completion order, not submission order — key by
//! `input_file` if order matters.

use crate::extract::{DocumentInput, Extractor};
use crate::model::{ExtractionResult, VendorCategory};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;

/// A boxed stream of per-document results, borrowing the extractor.
pub type ResultStream<'a> = Pin<Box<dyn Stream<Item = ExtractionResult> + Send + 'a>>;

impl Extractor {
    /// Process documents through the worker pool, streaming results.
    ///
    /// At most `config.concurrency` documents are in flight at once; each
    /// runs the full pipeline independently, so one failing document never
    /// disturbs the others. Backoff delays inside one document's gateway
    /// block only that worker.
    pub fn extract_stream(
        &self,
        docs: Vec<DocumentInput>,
        category: VendorCategory,
    ) -> ResultStream<'_> {
        let concurrency = self.config().concurrency;
        let s = stream::iter(
            docs.into_iter()
                .map(move |doc| self.extract_document(doc, category)),
        )
        .buffer_unordered(concurrency);
        Box::pin(s)
    }
}
