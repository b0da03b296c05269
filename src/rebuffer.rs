//! Push-driven regrouping state machine.
//!
//! [`Rebuffer`] owns the accumulation pool and the exhaustion flags but never
//! touches the upstream itself. A driver loops on [`Rebuffer::needs_input`],
//! feeding pulled batches through [`Rebuffer::push`], then takes the next
//! complete group with [`Rebuffer::pop`]:
//!
//! ```rust
//! use std::sync::Arc;
//! use arrow::array::{Int64Array, StringArray};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use regroup::{Rebuffer, RegroupOptions};
//!
//! # fn main() -> regroup::Result<()> {
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("value", DataType::Int64, false),
//!     Field::new("key", DataType::Utf8, false),
//! ]));
//! let batch = RecordBatch::try_new(
//!     schema.clone(),
//!     vec![
//!         Arc::new(Int64Array::from(vec![1, 2, 3])),
//!         Arc::new(StringArray::from(vec!["a", "a", "b"])),
//!     ],
//! )?;
//!
//! let mut rebuffer = Rebuffer::new(schema, "key", RegroupOptions::default());
//! let mut upstream = vec![batch].into_iter();
//! let mut sizes = Vec::new();
//! while !rebuffer.is_finished() {
//!     while rebuffer.needs_input() {
//!         if let Some(last) = rebuffer.push(upstream.next())? {
//!             sizes.push(last.num_rows());
//!         }
//!     }
//!     if let Some(group) = rebuffer.pop()? {
//!         sizes.push(group.num_rows());
//!     }
//! }
//! assert_eq!(sizes, vec![2, 1]);
//! # Ok(())
//! # }
//! ```

use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, RowConverter, SortField};
use tracing::{debug, warn};

use crate::error::{RegroupError, Result};
use crate::pool::{split_by_key, GroupPool};

/// What to do when a key enters the pool at or below the last emitted key,
/// either because its group was already emitted or because it arrived out of
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyReappearance {
    /// Fail with [`RegroupError::KeyReappeared`] and end the sequence
    #[default]
    Reject,
    /// Start a fresh group for the key and emit it again later
    Reemit,
}

/// Options for regrouping.
#[derive(Debug, Clone, Default)]
pub struct RegroupOptions {
    /// Handling of keys arriving at or below the last emitted key
    pub key_reappearance: KeyReappearance,
    /// Maximum bytes the pool may hold (unlimited when `None`)
    pub memory_limit: Option<usize>,
}

impl RegroupOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key reappearance policy.
    pub fn with_key_reappearance(mut self, policy: KeyReappearance) -> Self {
        self.key_reappearance = policy;
        self
    }

    /// Set the pool memory limit in bytes.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }
}

/// Regrouping core shared by [`GroupedBatchReader`](crate::GroupedBatchReader)
/// and [`GroupedBatchStream`](crate::GroupedBatchStream).
#[derive(Debug)]
pub struct Rebuffer {
    /// Upstream schema, used for the empty terminal batch
    schema: SchemaRef,
    /// Name of the grouping column
    group_field: String,
    options: RegroupOptions,
    /// Key encoder, created from the first key column seen
    converter: Option<(DataType, RowConverter)>,
    pool: GroupPool,
    /// Largest key emitted so far, with its label
    watermark: Option<(OwnedRow, String)>,
    /// Set once the upstream reported end of data
    source_exhausted: bool,
    /// Set once the sequence ended; terminal
    finished: bool,
    schema_checked: bool,
    batches_pulled: usize,
    groups_emitted: usize,
}

impl Rebuffer {
    /// Create a rebuffer grouping on `group_field`. No validation happens
    /// until the first batch is pushed.
    pub fn new(schema: SchemaRef, group_field: impl Into<String>, options: RegroupOptions) -> Self {
        Self {
            schema,
            group_field: group_field.into(),
            options,
            converter: None,
            pool: GroupPool::new(),
            watermark: None,
            source_exhausted: false,
            finished: false,
            schema_checked: false,
            batches_pulled: 0,
            groups_emitted: 0,
        }
    }

    /// Upstream schema.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Name of the grouping column.
    pub fn group_field(&self) -> &str {
        &self.group_field
    }

    /// True while another upstream batch must be pushed before [`pop`](Self::pop).
    ///
    /// A group is only known to be complete once a second key is pooled or
    /// the upstream is exhausted.
    pub fn needs_input(&self) -> bool {
        !self.finished && !self.source_exhausted && self.pool.len() <= 1
    }

    /// Whether the sequence has ended. Once set it stays set.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the upstream has reported end of data.
    pub fn is_source_exhausted(&self) -> bool {
        self.source_exhausted
    }

    /// Number of keys currently pooled.
    pub fn pooled_groups(&self) -> usize {
        self.pool.len()
    }

    /// Number of rows currently pooled.
    pub fn pooled_rows(&self) -> usize {
        self.pool.num_rows()
    }

    /// Bytes currently pooled.
    pub fn pooled_memory(&self) -> usize {
        self.pool.memory_size()
    }

    /// Number of upstream batches pushed so far.
    pub fn batches_pulled(&self) -> usize {
        self.batches_pulled
    }

    /// Number of groups emitted so far.
    pub fn groups_emitted(&self) -> usize {
        self.groups_emitted
    }

    /// Feed the next upstream batch, or `None` once the upstream is drained.
    ///
    /// Returns `Some(batch)` when the sequence ends with that empty batch:
    /// an empty batch arrived (or the upstream ended) while nothing was pooled.
    ///
    /// Any error ends the sequence and discards the pool.
    pub fn push(&mut self, batch: Option<RecordBatch>) -> Result<Option<RecordBatch>> {
        if self.finished {
            return Err(RegroupError::internal("batch pushed after the sequence finished"));
        }
        let result = self.push_inner(batch);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn push_inner(&mut self, batch: Option<RecordBatch>) -> Result<Option<RecordBatch>> {
        if !self.schema_checked {
            self.schema.index_of(&self.group_field).map_err(|_| {
                RegroupError::schema(format!(
                    "grouping column '{}' not found in upstream schema",
                    self.group_field
                ))
            })?;
            self.schema_checked = true;
        }

        let batch = match batch {
            Some(batch) => {
                self.batches_pulled += 1;
                batch
            }
            None => {
                debug!(batches = self.batches_pulled, "upstream exhausted");
                self.source_exhausted = true;
                RecordBatch::new_empty(self.schema.clone())
            }
        };

        if batch.num_rows() == 0 {
            if self.pool.is_empty() {
                debug!(groups = self.groups_emitted, "empty batch with nothing pooled, finishing");
                self.finished = true;
                return Ok(Some(batch));
            }
            return Ok(None);
        }

        self.absorb(&batch)?;
        Ok(None)
    }

    fn absorb(&mut self, batch: &RecordBatch) -> Result<()> {
        let column = batch.schema().index_of(&self.group_field).map_err(|_| {
            RegroupError::schema(format!(
                "grouping column '{}' not found in batch schema",
                self.group_field
            ))
        })?;
        let converter = self.converter_for(batch.column(column).data_type())?;
        let parts = split_by_key(batch, column, converter)?;

        if let Some((watermark, last_emitted)) = &self.watermark {
            for part in &parts {
                if part.key > *watermark || self.pool.contains(&part.key) {
                    continue;
                }
                match self.options.key_reappearance {
                    KeyReappearance::Reject => {
                        return Err(RegroupError::key_reappeared(
                            part.label.clone(),
                            last_emitted.clone(),
                        ));
                    }
                    KeyReappearance::Reemit => {
                        warn!(
                            key = %part.label,
                            last_emitted = %last_emitted,
                            "group key arrived at or below the last emitted key"
                        );
                    }
                }
            }
        }

        for part in parts {
            self.pool.append(part)?;
        }

        if let Some(limit) = self.options.memory_limit {
            let used = self.pool.memory_size();
            if used > limit {
                return Err(RegroupError::resource_exhausted(format!(
                    "pooled groups hold {} bytes, limit is {}",
                    used, limit
                )));
            }
        }
        Ok(())
    }

    fn converter_for(&mut self, data_type: &DataType) -> Result<&RowConverter> {
        if let Some((expected, _)) = &self.converter {
            if expected != data_type {
                return Err(RegroupError::invalid_input(format!(
                    "grouping column '{}' changed type from {} to {}",
                    self.group_field, expected, data_type
                )));
            }
        } else {
            let fields = vec![SortField::new(data_type.clone())];
            if !RowConverter::supports_fields(&fields) {
                return Err(RegroupError::invalid_input(format!(
                    "grouping column '{}' has type {} which cannot be ordered",
                    self.group_field, data_type
                )));
            }
            self.converter = Some((data_type.clone(), RowConverter::new(fields)?));
        }

        self.converter
            .as_ref()
            .map(|(_, converter)| converter)
            .ok_or_else(|| RegroupError::internal("row converter missing"))
    }

    /// Remove and return the complete group with the smallest key.
    ///
    /// Returns `None` once the upstream is exhausted and the pool is empty;
    /// the sequence is finished from then on.
    pub fn pop(&mut self) -> Result<Option<RecordBatch>> {
        if self.finished {
            return Ok(None);
        }
        if self.needs_input() {
            return Err(RegroupError::internal(
                "pop called before the smallest group was complete",
            ));
        }

        let Some((key, group)) = self.pool.pop_first() else {
            debug!(groups = self.groups_emitted, "all groups emitted");
            self.finished = true;
            return Ok(None);
        };

        debug!(
            key = %group.label(),
            rows = group.num_rows(),
            batches = group.num_batches(),
            "emitting group"
        );
        let label = group.label().to_string();
        let batch = match group.into_batch() {
            Ok(batch) => batch,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        if self.watermark.as_ref().map_or(true, |(w, _)| key > *w) {
            self.watermark = Some((key, label));
        }
        self.groups_emitted += 1;
        Ok(Some(batch))
    }

    fn abort(&mut self) {
        debug!(pooled = self.pool.len(), "regrouping aborted");
        self.pool.clear();
        self.finished = true;
    }
}
