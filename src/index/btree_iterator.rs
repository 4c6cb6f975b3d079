use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{IndexKey, PageId, RecordId, Result, TaprootError, INVALID_PAGE_ID};

use super::btree_page::LeafNodeRef;

/// Forward iterator over the leaf chain of a B+ tree.
///
/// The position is just a (leaf page id, slot index) pair; no pin is
/// retained between uses. Each dereference or advance fetches the leaf,
/// holds its read latch for the single access, and releases everything
/// before returning.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            bpm,
            page_id,
            index,
        }
    }

    /// True once the iterator has walked off the last leaf.
    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// Reads the entry at the current position.
    pub fn get(&self) -> Result<(IndexKey, RecordId)> {
        if self.is_end() {
            return Err(TaprootError::IteratorExhausted);
        }

        let guard = self.bpm.fetch_page_read(self.page_id)?;
        let leaf = LeafNodeRef::new(guard.data());
        if self.index >= leaf.size() {
            return Err(TaprootError::IteratorExhausted);
        }
        Ok(leaf.item(self.index))
    }

    /// Steps to the next entry, following the sibling link at the end of
    /// the current leaf.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Err(TaprootError::IteratorExhausted);
        }

        let guard = self.bpm.fetch_page_read(self.page_id)?;
        let leaf = LeafNodeRef::new(guard.data());
        self.index += 1;
        if self.index >= leaf.size() {
            self.page_id = leaf.next_page_id();
            self.index = 0;
        }
        Ok(())
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl Eq for IndexIterator {}

impl Iterator for IndexIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let item = match self.get() {
            Ok(item) => item,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = self.advance() {
            return Some(Err(e));
        }
        Some(Ok(item))
    }
}
