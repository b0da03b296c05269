//! Pull-based regrouping over an Arrow [`RecordBatchReader`].

use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchIterator, RecordBatchReader};
use tracing::trace;

use crate::error::{RegroupError, Result};
use crate::rebuffer::{Rebuffer, RegroupOptions};

/// Iterator yielding one batch per key of `group_field`, in ascending key order.
///
/// Each emitted batch holds every row of its key, provided the upstream never
/// brings a key back once a larger key has been emitted. An empty upstream
/// yields a single empty batch. After the last batch every call to `next`
/// returns `None`.
///
/// Upstream errors are returned as [`RegroupError::Upstream`] and leave the
/// reader usable; any other error ends the sequence.
pub struct GroupedBatchReader<R> {
    input: R,
    rebuffer: Rebuffer,
}

impl<R: RecordBatchReader> GroupedBatchReader<R> {
    /// Regroup `input` on the column named `group_field`.
    pub fn new(input: R, group_field: impl Into<String>) -> Self {
        Self::with_options(input, group_field, RegroupOptions::default())
    }

    /// Regroup `input` with custom options.
    pub fn with_options(input: R, group_field: impl Into<String>, options: RegroupOptions) -> Self {
        let rebuffer = Rebuffer::new(input.schema(), group_field, options);
        Self { input, rebuffer }
    }

    /// Schema of the emitted batches.
    pub fn schema(&self) -> SchemaRef {
        self.rebuffer.schema()
    }

    /// The underlying state machine, for inspecting pool state.
    pub fn rebuffer(&self) -> &Rebuffer {
        &self.rebuffer
    }

    /// Consume the reader, returning the upstream.
    pub fn into_inner(self) -> R {
        self.input
    }

    fn next_group(&mut self) -> Result<Option<RecordBatch>> {
        if self.rebuffer.is_finished() {
            return Ok(None);
        }

        while self.rebuffer.needs_input() {
            let pulled = self.input.next().transpose().map_err(RegroupError::upstream)?;
            trace!(
                rows = ?pulled.as_ref().map(|b| b.num_rows()),
                pooled = self.rebuffer.pooled_groups(),
                "pulled upstream batch"
            );
            if let Some(last) = self.rebuffer.push(pulled)? {
                return Ok(Some(last));
            }
        }

        self.rebuffer.pop()
    }
}

impl<I> GroupedBatchReader<RecordBatchIterator<I>>
where
    I: IntoIterator<Item = std::result::Result<RecordBatch, ArrowError>>,
{
    /// Regroup in-memory batches sharing `schema`.
    pub fn from_batches(
        schema: SchemaRef,
        batches: I,
        group_field: impl Into<String>,
    ) -> Self {
        Self::new(RecordBatchIterator::new(batches, schema), group_field)
    }
}

impl<R: RecordBatchReader> Iterator for GroupedBatchReader<R> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_group().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::error::Error as _;
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("value", DataType::Int64, false),
            Field::new("key", DataType::Utf8, false),
        ]))
    }

    fn create_batch(keys: &[&str]) -> RecordBatch {
        let values: Vec<i64> = (0..keys.len() as i64).collect();
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(values)),
                Arc::new(StringArray::from(keys.to_vec())),
            ],
        )
        .unwrap()
    }

    fn reader(
        batches: Vec<RecordBatch>,
    ) -> GroupedBatchReader<
        RecordBatchIterator<Vec<std::result::Result<RecordBatch, ArrowError>>>,
    > {
        GroupedBatchReader::from_batches(schema(), batches.into_iter().map(Ok).collect(), "key")
    }

    #[test]
    fn test_two_keys_across_chunks() {
        let mut reader = reader(vec![
            create_batch(&["01", "01", "01"]),
            create_batch(&["02", "02", "02"]),
        ]);

        let sizes: Vec<usize> = reader.by_ref().map(|b| b.unwrap().num_rows()).collect();
        assert_eq!(sizes, vec![3, 3]);
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_keys_out_of_appearance_order() {
        let reader = reader(vec![create_batch(&["b", "a", "c"])]);
        let keys: Vec<String> = reader
            .map(|b| {
                let b = b.unwrap();
                let keys = b.column(1).as_any().downcast_ref::<StringArray>().unwrap();
                keys.value(0).to_string()
            })
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_upstream() {
        let mut reader = reader(vec![]);
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), schema());
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_leading_empty_batch() {
        let mut reader = reader(vec![create_batch(&[]), create_batch(&["01"])]);
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), schema());
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
        assert_eq!(reader.rebuffer().batches_pulled(), 1);
    }

    #[test]
    fn test_upstream_error_propagates_unchanged() {
        let batches = vec![
            Ok(create_batch(&["01", "01"])),
            Err(ArrowError::ParseError("line 3: bad value".to_string())),
            Ok(create_batch(&["01", "02"])),
        ];
        let mut reader = GroupedBatchReader::from_batches(schema(), batches, "key");

        let err = reader.next().unwrap().unwrap_err();
        assert!(err.is_upstream());
        let source = err.source().unwrap().downcast_ref::<ArrowError>().unwrap();
        assert!(matches!(source, ArrowError::ParseError(m) if m == "line 3: bad value"));

        // the pooled rows survive the upstream failure
        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.num_rows(), 3);
        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.num_rows(), 1);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_missing_field_surfaces_on_first_pull() {
        let mut reader = GroupedBatchReader::from_batches(
            schema(),
            vec![Ok(create_batch(&["01"]))],
            "region",
        );
        assert!(matches!(
            reader.next(),
            Some(Err(RegroupError::Schema { .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_rebuffer_state_visible() {
        let mut reader = reader(vec![
            create_batch(&["01", "01", "02"]),
            create_batch(&["02", "03", "03"]),
        ]);
        reader.next().unwrap().unwrap();
        assert_eq!(reader.rebuffer().pooled_groups(), 1);
        assert_eq!(reader.rebuffer().batches_pulled(), 1);
        assert_eq!(reader.count(), 2);
    }
}
