//! Word-based software transactional memory with dual-copy versioning.
//!
//! # Architecture
//!
//! A [`Region`] is a set of segments. Every word of a segment has two
//! physical copies and one control that says which copy is valid, whether
//! the word has a pending write, and which transaction touched it first.
//!
//! - **Reads**: read-only transactions always read the valid copy and never
//!   conflict. Read-write transactions read the valid copy, or their own
//!   pending write.
//! - **Writes**: go to the scratch copy of a word the writer owns. A word
//!   touched by another transaction is a conflict and the writer aborts.
//! - **Commit**: flips the valid copy of every written word. Abort leaves the
//!   valid copies alone.
//! - **Reclamation**: freed segments are unlinked at once and handed to a
//!   [`cohort`] collector, which releases them once every transaction
//!   admitted before the free has ended.
//!
//! # Example
//!
//! ```
//! use cohort_stm::{Region, TmError};
//!
//! let region = Region::create(64, 8).unwrap();
//! let head = region.start();
//!
//! // Allocate a node and link it from the first word.
//! let node = region
//!     .atomically(false, |tx| {
//!         let node = tx.alloc(16)?;
//!         tx.write(&7u64.to_ne_bytes(), node)?;
//!         tx.write(&node.to_bits().to_ne_bytes(), head)?;
//!         Ok::<_, TmError>(node)
//!     })
//!     .unwrap();
//!
//! let mut tx = region.begin(true).unwrap();
//! let mut buf = [0u8; 8];
//! tx.read(head, &mut buf).unwrap();
//! assert_eq!(u64::from_ne_bytes(buf), node.to_bits());
//! assert!(tx.end());
//! ```

#![warn(missing_docs)]

mod addr;
mod admission;
mod config;
mod conflict;
mod control;
mod errors;
mod region;
mod segment;
mod stats;
mod table;
mod transaction;

pub use addr::Addr;
pub use config::{Admission, MAX_SEGMENT_BYTES, MAX_SEGMENTS, MIN_ALIGN, RegionConfig, SLOT_CHUNK};
pub use errors::TmError;
pub use region::Region;
pub use stats::RegionStats;
pub use transaction::{Transaction, TxId};
