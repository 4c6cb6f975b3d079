//! Taproot - the storage core of a disk-resident database index
//!
//! This crate implements a page-oriented B+ tree keyed by fixed-width
//! comparable keys mapping to record identifiers, with all page access
//! mediated by a fixed-size buffer pool.
//!
//! # Architecture
//!
//! The system is organized into layers, leaves first:
//!
//! - **Storage Layer** (`storage`): block I/O by page id
//!   - `DiskManager`: reads/writes 4 KiB pages and allocates page ids
//!   - `DiskScheduler`: background worker funnelling page I/O
//!
//! - **Buffer Pool** (`buffer`): bounded in-memory page cache
//!   - `BufferPoolManager`: pins pages in frames, tracks dirtiness,
//!     evicts under LRU
//!   - `LruReplacer`: FIFO-on-unpin replacement policy
//!   - `FrameHeader`: per-frame metadata plus the page latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin + latch handles
//!
//! - **Index** (`index`): the B+ tree
//!   - `BTreeIndex`: search, insert, delete with latch-coupled descent
//!   - `IndexIterator`: ordered forward scan across the leaf chain
//!   - `KeyComparator`: total order over fixed-width keys
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taproot::buffer::BufferPoolManager;
//! use taproot::index::{BTreeIndex, IntegerComparator};
//! use taproot::storage::disk::DiskManager;
//! use taproot::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("index.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//! let index = BTreeIndex::new(bpm, Arc::new(IntegerComparator));
//!
//! let key = 42u64.to_le_bytes();
//! let rid = RecordId::new(PageId::new(7), SlotId::new(0));
//! index.insert(&key, rid).unwrap();
//! assert_eq!(index.get_value(&key).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{IndexKey, PageId, RecordId, Result, SlotId, TaprootError};
