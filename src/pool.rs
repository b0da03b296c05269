//! Accumulation pool for partially read groups.
//!
//! Keys are held in Arrow's row format, so the pool order is the natural
//! ascending order of the grouping column (nulls first).

use std::collections::{BTreeMap, HashMap};

use arrow::array::{Array, ArrayRef, UInt64Array};
use arrow::compute::{concat_batches, take_record_batch};
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, Row, RowConverter};
use arrow::util::display::array_value_to_string;

use crate::error::{RegroupError, Result};

/// Rows of one upstream batch that share a single key.
#[derive(Debug, Clone)]
pub struct KeyedBatch {
    /// Row-encoded key
    pub key: OwnedRow,
    /// Printable form of the key, for logs and errors
    pub label: String,
    /// The matching rows, in upstream order
    pub batch: RecordBatch,
}

/// Split `batch` into one sub-batch per distinct value of `column`.
///
/// Sub-batches are returned in the order their key first appears in `batch`.
/// When `batch` holds more than one key, each sub-batch is copied out so a
/// pooled group never keeps the rest of the upstream buffers alive.
pub fn split_by_key(
    batch: &RecordBatch,
    column: usize,
    converter: &RowConverter,
) -> Result<Vec<KeyedBatch>> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }

    let key_column = batch.column(column);
    let rows = converter.convert_columns(&[key_column.clone()])?;

    let mut positions: HashMap<Row<'_>, usize> = HashMap::new();
    let mut groups: Vec<(Row<'_>, Vec<usize>)> = Vec::new();
    let mut last: Option<usize> = None;

    for (idx, row) in rows.iter().enumerate() {
        // sorted input mostly repeats the previous key
        if let Some(g) = last {
            if groups[g].0 == row {
                groups[g].1.push(idx);
                continue;
            }
        }
        let g = match positions.get(&row) {
            Some(&g) => g,
            None => {
                positions.insert(row, groups.len());
                groups.push((row, Vec::new()));
                groups.len() - 1
            }
        };
        groups[g].1.push(idx);
        last = Some(g);
    }

    if groups.len() == 1 {
        let row = groups[0].0;
        return Ok(vec![KeyedBatch {
            key: row.owned(),
            label: key_label(key_column, 0),
            batch: batch.clone(),
        }]);
    }

    let mut parts = Vec::with_capacity(groups.len());
    for (row, indices) in groups {
        let take = UInt64Array::from_iter_values(indices.iter().map(|&i| i as u64));
        parts.push(KeyedBatch {
            key: row.owned(),
            label: key_label(key_column, indices[0]),
            batch: take_record_batch(batch, &take)?,
        });
    }
    Ok(parts)
}

fn key_label(column: &ArrayRef, row: usize) -> String {
    if column.is_null(row) {
        return "NULL".to_string();
    }
    array_value_to_string(column.as_ref(), row).unwrap_or_else(|_| format!("<row {}>", row))
}

/// Bytes referenced by the visible rows of `batch`.
///
/// Unlike [`RecordBatch::get_array_memory_size`] this does not count buffer
/// space outside the batch's offset and length, so a slice of a larger batch
/// is charged only for its own rows.
pub fn batch_memory_size(batch: &RecordBatch) -> Result<usize> {
    let mut size = 0;
    for column in batch.columns() {
        size += column.to_data().get_slice_memory_size()?;
    }
    Ok(size)
}

/// All rows seen so far for one key.
#[derive(Debug)]
pub struct PooledGroup {
    label: String,
    batches: Vec<RecordBatch>,
    num_rows: usize,
    memory_size: usize,
}

impl PooledGroup {
    fn new(label: String) -> Self {
        Self {
            label,
            batches: Vec::new(),
            num_rows: 0,
            memory_size: 0,
        }
    }

    fn push(&mut self, batch: RecordBatch, size: usize) {
        self.num_rows += batch.num_rows();
        self.memory_size += size;
        self.batches.push(batch);
    }

    /// Printable key of this group.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Total rows pooled for this key.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of upstream sub-batches pooled for this key.
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// Bytes held by the pooled sub-batches.
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    /// Concatenate the pooled sub-batches, in arrival order, into one batch.
    pub fn into_batch(mut self) -> Result<RecordBatch> {
        if self.batches.len() > 1 {
            let schema = self.batches[0].schema();
            return Ok(concat_batches(&schema, &self.batches)?);
        }
        self.batches
            .pop()
            .ok_or_else(|| RegroupError::internal(format!("group {} has no pooled rows", self.label)))
    }
}

/// Groups whose rows may still be extended by later upstream batches.
#[derive(Debug, Default)]
pub struct GroupPool {
    groups: BTreeMap<OwnedRow, PooledGroup>,
    num_rows: usize,
    memory_size: usize,
}

impl GroupPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to the group for their key, creating it on first sight.
    pub fn append(&mut self, keyed: KeyedBatch) -> Result<()> {
        let KeyedBatch { key, label, batch } = keyed;
        let size = batch_memory_size(&batch)?;
        self.num_rows += batch.num_rows();
        self.memory_size += size;
        self.groups
            .entry(key)
            .or_insert_with(|| PooledGroup::new(label))
            .push(batch, size);
        Ok(())
    }

    /// Whether a group for `key` is pooled.
    pub fn contains(&self, key: &OwnedRow) -> bool {
        self.groups.contains_key(key)
    }

    /// Remove and return the group with the smallest key.
    pub fn pop_first(&mut self) -> Option<(OwnedRow, PooledGroup)> {
        let (key, group) = self.groups.pop_first()?;
        self.num_rows -= group.num_rows;
        self.memory_size -= group.memory_size;
        Some((key, group))
    }

    /// Drop every pooled group.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.num_rows = 0;
        self.memory_size = 0;
    }

    /// Number of distinct pooled keys.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Rows across all pooled groups.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Bytes across all pooled groups.
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }
}
