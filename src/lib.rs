//! Regroup - one record batch per group key
//!
//! Regroup re-buffers a stream of Apache Arrow record batches so that every
//! emitted batch holds all rows of exactly one value of a grouping column,
//! in ascending key order. The input keeps its streaming nature: only the
//! group being finished and the group after it are held in memory.
//!
//! # Features
//!
//! - **Pull-based**: Upstream batches are read only when a group may still grow
//! - **Ordered output**: Groups come out in the natural order of the key type
//! - **Arrow-native**: Any `RecordBatchReader` works as upstream
//! - **Async**: The same regrouping over an async batch stream
//!
//! # Input contract
//!
//! Rows of one key must be contiguous across upstream batches: once a larger
//! key has started, a smaller key must not show up again. Sorted input always
//! satisfies this. Violations are reported as
//! [`RegroupError::KeyReappeared`] unless
//! [`KeyReappearance::Reemit`] is configured.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use regroup::{CsvOptions, CsvSource, RegroupOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let source = CsvSource::open_with_options(
//!         "data/sales.csv",
//!         CsvOptions::default().with_batch_size(1024),
//!     )?;
//!
//!     for group in source.group_by("customer_id", RegroupOptions::default())? {
//!         let group = group?;
//!         println!("{} rows", group.num_rows());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod csv;
pub mod error;
pub mod pool;
pub mod reader;
pub mod rebuffer;
pub mod streaming;

// Re-export commonly used types
pub use csv::{write_csv, CsvOptions, CsvSource};
pub use error::{RegroupError, Result};
pub use reader::GroupedBatchReader;
pub use rebuffer::{KeyReappearance, Rebuffer, RegroupOptions};
pub use streaming::{GroupedBatchStream, MemoryStream, RecordBatchStream};
