use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{IndexKey, PageId, RecordId, Result, TaprootError, INVALID_PAGE_ID};

use super::btree_iterator::IndexIterator;
use super::btree_page::{
    BTreePageMut, BTreePageRef, InternalNode, InternalNodeRef, LeafNode, LeafNodeRef,
    DEFAULT_INTERNAL_MAX_SIZE, DEFAULT_LEAF_MAX_SIZE, INTERNAL_PAGE_SLOT_CNT, LEAF_PAGE_SLOT_CNT,
};
use super::key_comparator::KeyComparator;

/// Latches held during a structure-modifying descent: the root id latch
/// plus the chain of page latches from the shallowest unsafe ancestor
/// down to the current node. Once a node is "safe" (cannot split or
/// underflow), everything above it is released.
struct Context<'a> {
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    write_set: Vec<WritePageGuard>,
}

impl Context<'_> {
    fn release_ancestors(&mut self) {
        self.root_guard = None;
        self.write_set.clear();
    }
}

/// A B+ tree index mapping fixed-width keys to record ids, stored in
/// pages mediated by the buffer pool.
///
/// Readers and writers descend with latch coupling: a child's latch is
/// acquired before the parent's is released, and writers keep ancestor
/// latches only while a split or merge could still propagate to them.
/// The latch order is strictly root-to-leaf, so the nesting cannot
/// deadlock.
pub struct BTreeIndex {
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    root_page_id: RwLock<PageId>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BTreeIndex {
    /// Creates an empty tree with the default node sizes. No page is
    /// allocated until the first insert.
    pub fn new(bpm: Arc<BufferPoolManager>, comparator: Arc<dyn KeyComparator>) -> Self {
        Self::with_max_sizes(
            bpm,
            comparator,
            DEFAULT_LEAF_MAX_SIZE,
            DEFAULT_INTERNAL_MAX_SIZE,
        )
    }

    /// Creates an empty tree with explicit node sizes. One physical slot
    /// above `max_size` must remain free on each page for the transient
    /// overflow between an insert and its split.
    pub fn with_max_sizes(
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(
            (2..LEAF_PAGE_SLOT_CNT).contains(&leaf_max_size),
            "leaf max size out of range"
        );
        assert!(
            (3..INTERNAL_PAGE_SLOT_CNT).contains(&internal_max_size),
            "internal max size out of range"
        );
        Self {
            bpm,
            comparator,
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Reattaches to a tree previously persisted through the same pool.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        root_page_id: PageId,
    ) -> Self {
        let index = Self::new(bpm, comparator);
        *index.root_page_id.write() = root_page_id;
        index
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Point lookup. Descends with read-latch coupling.
    pub fn get_value(&self, key: &IndexKey) -> Result<Option<RecordId>> {
        let root_guard = self.root_page_id.read();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(*root_guard)?;
        drop(root_guard);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafNodeRef::new(guard.data());
                return Ok(leaf.lookup(key, self.comparator.as_ref()));
            }
            let child_id = InternalNodeRef::new(guard.data()).lookup(key, self.comparator.as_ref());
            let child_guard = self.bpm.fetch_page_read(child_id)?;
            guard = child_guard;
        }
    }

    /// Inserts a key. Returns false if the key is already present.
    pub fn insert(&self, key: &IndexKey, value: RecordId) -> Result<bool> {
        let mut root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            let root_id = self.start_new_tree(key, value)?;
            *root_guard = root_id;
            return Ok(true);
        }

        let mut page_id = *root_guard;
        let mut ctx = Context {
            root_guard: Some(root_guard),
            write_set: Vec::new(),
        };

        loop {
            let guard = self.bpm.fetch_page_write(page_id)?;
            let (is_leaf, safe) = {
                let page = BTreePageRef::new(guard.data());
                (page.is_leaf(), page.size() < page.max_size())
            };
            if safe {
                ctx.release_ancestors();
            }
            if is_leaf {
                ctx.write_set.push(guard);
                break;
            }
            let child = InternalNodeRef::new(guard.data()).lookup(key, self.comparator.as_ref());
            ctx.write_set.push(guard);
            page_id = child;
        }

        let (inserted, overflow) = {
            let guard = ctx.write_set.last_mut().expect("leaf latch retained");
            let mut leaf = LeafNode::new(guard.data_mut());
            let before = leaf.size();
            let after = leaf.insert(key, value, self.comparator.as_ref());
            (after > before, after > leaf.max_size())
        };

        if !inserted {
            return Ok(false);
        }
        if overflow {
            self.split_leaf(&mut ctx)?;
        }
        Ok(true)
    }

    /// Removes a key. Returns false if the key is absent.
    pub fn remove(&self, key: &IndexKey) -> Result<bool> {
        let root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut page_id = *root_guard;
        let mut ctx = Context {
            root_guard: Some(root_guard),
            write_set: Vec::new(),
        };

        let mut at_root = true;
        let leaf_is_root;
        loop {
            let guard = self.bpm.fetch_page_write(page_id)?;
            let (is_leaf, safe) = {
                let page = BTreePageRef::new(guard.data());
                let safe = if at_root {
                    // The root is exempt from min occupancy; it only
                    // needs handling when it could empty or collapse.
                    if page.is_leaf() {
                        page.size() > 1
                    } else {
                        page.size() > 2
                    }
                } else {
                    page.size() > page.min_size()
                };
                (page.is_leaf(), safe)
            };
            if safe {
                ctx.release_ancestors();
            }
            if is_leaf {
                leaf_is_root = at_root;
                ctx.write_set.push(guard);
                break;
            }
            let child = InternalNodeRef::new(guard.data()).lookup(key, self.comparator.as_ref());
            ctx.write_set.push(guard);
            page_id = child;
            at_root = false;
        }

        let (removed, new_size) = {
            let guard = ctx.write_set.last_mut().expect("leaf latch retained");
            let mut leaf = LeafNode::new(guard.data_mut());
            let before = leaf.size();
            let after = leaf.remove_and_delete_record(key, self.comparator.as_ref());
            (after < before, after)
        };
        if !removed {
            return Ok(false);
        }

        if leaf_is_root {
            if new_size == 0 {
                let guard = ctx.write_set.pop().expect("leaf latch retained");
                let root_page_id = guard.page_id();
                drop(guard);
                self.delete_node_page(root_page_id)?;
                let root = ctx
                    .root_guard
                    .as_mut()
                    .expect("root id latch held while emptying tree");
                **root = INVALID_PAGE_ID;
                debug!("tree emptied");
            }
            return Ok(true);
        }

        let min_size = {
            let guard = ctx.write_set.last().expect("leaf latch retained");
            BTreePageRef::new(guard.data()).min_size()
        };
        if new_size < min_size {
            self.coalesce_or_redistribute(&mut ctx)?;
        }
        Ok(true)
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        let root_guard = self.root_page_id.read();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(self.end());
        }
        let mut guard = self.bpm.fetch_page_read(*root_guard)?;
        drop(root_guard);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(IndexIterator::new(Arc::clone(&self.bpm), guard.page_id(), 0));
            }
            let child_id = InternalNodeRef::new(guard.data()).value_at(0);
            let child_guard = self.bpm.fetch_page_read(child_id)?;
            guard = child_guard;
        }
    }

    /// Iterator positioned at the first key >= the probe (lower bound).
    pub fn begin_from(&self, key: &IndexKey) -> Result<IndexIterator> {
        let root_guard = self.root_page_id.read();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(self.end());
        }
        let mut guard = self.bpm.fetch_page_read(*root_guard)?;
        drop(root_guard);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafNodeRef::new(guard.data());
                let index = leaf.key_index(key, self.comparator.as_ref());
                if index < leaf.size() {
                    return Ok(IndexIterator::new(
                        Arc::clone(&self.bpm),
                        guard.page_id(),
                        index,
                    ));
                }
                // The lower bound falls past this leaf's last entry.
                return Ok(IndexIterator::new(
                    Arc::clone(&self.bpm),
                    leaf.next_page_id(),
                    0,
                ));
            }
            let child_id = InternalNodeRef::new(guard.data()).lookup(key, self.comparator.as_ref());
            let child_guard = self.bpm.fetch_page_read(child_id)?;
            guard = child_guard;
        }
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::new(Arc::clone(&self.bpm), INVALID_PAGE_ID, 0)
    }

    /// Drops an unlinked node page. A concurrent scan may still hold a
    /// handle on it; in that case the page stays cached until evicted
    /// and only its disk slot is retained.
    fn delete_node_page(&self, page_id: PageId) -> Result<()> {
        match self.bpm.delete_page(page_id) {
            Ok(_) => Ok(()),
            Err(TaprootError::PagePinned(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn start_new_tree(&self, key: &IndexKey, value: RecordId) -> Result<PageId> {
        let page_id = self.bpm.new_page()?;
        let mut guard = self.bpm.fetch_page_write(page_id)?;
        let mut leaf = LeafNode::new(guard.data_mut());
        leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key, value, self.comparator.as_ref());
        debug!(root = page_id.as_u32(), "started new tree");
        Ok(page_id)
    }

    /// Splits the overflowed leaf at the tail of the write set and
    /// pushes the new sibling's first key into the parent.
    fn split_leaf(&self, ctx: &mut Context<'_>) -> Result<()> {
        let mut leaf_guard = ctx.write_set.pop().expect("overflowed leaf latch retained");
        let new_page_id = self.bpm.new_page()?;
        let mut new_guard = self.bpm.fetch_page_write(new_page_id)?;

        let (left_id, separator) = {
            let mut leaf = LeafNode::new(leaf_guard.data_mut());
            let mut sibling = LeafNode::new(new_guard.data_mut());
            sibling.init(new_page_id, leaf.parent_page_id(), self.leaf_max_size);
            leaf.move_half_to(&mut sibling);
            sibling.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_page_id);
            (leaf.page_id(), sibling.key_at(0))
        };

        debug!(
            left = left_id.as_u32(),
            right = new_page_id.as_u32(),
            "split leaf"
        );
        drop(new_guard);
        drop(leaf_guard);
        self.insert_into_parent(ctx, left_id, separator, new_page_id)
    }

    /// Links a freshly split-off sibling into the parent, growing a new
    /// root when the split node was the root.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        left_id: PageId,
        key: IndexKey,
        right_id: PageId,
    ) -> Result<()> {
        if ctx.write_set.is_empty() {
            let new_root_id = self.bpm.new_page()?;
            {
                let mut root_guard = self.bpm.fetch_page_write(new_root_id)?;
                let mut root = InternalNode::new(root_guard.data_mut());
                root.init(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(left_id, &key, right_id);
            }
            for child_id in [left_id, right_id] {
                let mut child_guard = self.bpm.fetch_page_write(child_id)?;
                BTreePageMut::new(child_guard.data_mut()).set_parent_page_id(new_root_id);
            }
            let root = ctx
                .root_guard
                .as_mut()
                .expect("root id latch held across root split");
            **root = new_root_id;
            debug!(root = new_root_id.as_u32(), "grew tree with new root");
            return Ok(());
        }

        let overflow = {
            let parent_guard = ctx.write_set.last_mut().expect("parent latch retained");
            let mut parent = InternalNode::new(parent_guard.data_mut());
            parent.insert_node_after(left_id, &key, right_id);
            parent.size() > parent.max_size()
        };
        if overflow {
            self.split_internal(ctx)?;
        }
        Ok(())
    }

    fn split_internal(&self, ctx: &mut Context<'_>) -> Result<()> {
        let mut node_guard = ctx
            .write_set
            .pop()
            .expect("overflowed internal latch retained");
        let new_page_id = self.bpm.new_page()?;
        let mut new_guard = self.bpm.fetch_page_write(new_page_id)?;

        let (left_id, separator) = {
            let mut node = InternalNode::new(node_guard.data_mut());
            let mut sibling = InternalNode::new(new_guard.data_mut());
            sibling.init(new_page_id, node.parent_page_id(), self.internal_max_size);
            node.move_half_to(&mut sibling, self.bpm.as_ref())?;
            // The pushed-up key sits in the sibling's sentinel slot.
            (node.page_id(), sibling.key_at(0))
        };

        debug!(
            left = left_id.as_u32(),
            right = new_page_id.as_u32(),
            "split internal node"
        );
        drop(new_guard);
        drop(node_guard);
        self.insert_into_parent(ctx, left_id, separator, new_page_id)
    }

    /// Cures the underflow of the node at the tail of the write set by
    /// merging with or borrowing from an adjacent sibling. Prefers the
    /// left sibling; merges move the right node into the left one.
    fn coalesce_or_redistribute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let node_guard = ctx.write_set.pop().expect("underflowed node latch retained");

        if ctx.write_set.is_empty() {
            return self.adjust_root(ctx, node_guard);
        }

        let node_id = node_guard.page_id();
        let (parent_index, sibling_index, sibling_id) = {
            let parent_guard = ctx.write_set.last().expect("parent latch retained");
            let parent = InternalNodeRef::new(parent_guard.data());
            let index = parent
                .value_index(node_id)
                .expect("underflowed child missing from its parent");
            let sibling_index = if index == 0 { 1 } else { index - 1 };
            (index, sibling_index, parent.value_at(sibling_index))
        };

        let sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

        let (can_merge, is_leaf) = {
            let node = BTreePageRef::new(node_guard.data());
            let sibling = BTreePageRef::new(sibling_guard.data());
            (
                node.size() + sibling.size() <= node.max_size(),
                node.is_leaf(),
            )
        };

        if can_merge {
            self.coalesce(
                ctx,
                node_guard,
                sibling_guard,
                parent_index,
                sibling_index,
                is_leaf,
            )
        } else {
            self.redistribute(
                ctx,
                node_guard,
                sibling_guard,
                parent_index,
                sibling_index,
                is_leaf,
            )
        }
    }

    /// Merges the right of (node, sibling) into the left, deletes the
    /// emptied page, and removes the separator from the parent, which
    /// may recursively underflow.
    fn coalesce(
        &self,
        ctx: &mut Context<'_>,
        node_guard: WritePageGuard,
        sibling_guard: WritePageGuard,
        parent_index: usize,
        sibling_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let (mut left_guard, mut right_guard, right_index) = if sibling_index < parent_index {
            (sibling_guard, node_guard, parent_index)
        } else {
            (node_guard, sibling_guard, sibling_index)
        };
        let right_id = right_guard.page_id();

        {
            let middle_key = {
                let parent_guard = ctx.write_set.last().expect("parent latch retained");
                InternalNodeRef::new(parent_guard.data()).key_at(right_index)
            };
            if is_leaf {
                let mut right = LeafNode::new(right_guard.data_mut());
                let mut left = LeafNode::new(left_guard.data_mut());
                right.move_all_to(&mut left);
            } else {
                let mut right = InternalNode::new(right_guard.data_mut());
                let mut left = InternalNode::new(left_guard.data_mut());
                right.move_all_to(&mut left, &middle_key, self.bpm.as_ref())?;
            }
        }

        drop(left_guard);
        drop(right_guard);
        self.delete_node_page(right_id)?;
        debug!(
            page_id = right_id.as_u32(),
            "merged node into its left sibling"
        );

        let parent_underflow = {
            let parent_is_root = ctx.write_set.len() == 1 && ctx.root_guard.is_some();
            let parent_guard = ctx.write_set.last_mut().expect("parent latch retained");
            let mut parent = InternalNode::new(parent_guard.data_mut());
            let new_size = parent.remove(right_index);
            if parent_is_root {
                new_size < 2
            } else {
                new_size < parent.min_size()
            }
        };

        if parent_underflow {
            self.coalesce_or_redistribute(ctx)?;
        }
        Ok(())
    }

    /// Moves one entry across the boundary between the node and its
    /// sibling, then rewrites the parent's separator to the new
    /// boundary key.
    fn redistribute(
        &self,
        ctx: &mut Context<'_>,
        mut node_guard: WritePageGuard,
        mut sibling_guard: WritePageGuard,
        parent_index: usize,
        sibling_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let from_right = sibling_index > parent_index;
        let separator_index = if from_right {
            sibling_index
        } else {
            parent_index
        };

        let new_separator = if is_leaf {
            let mut sibling = LeafNode::new(sibling_guard.data_mut());
            let mut node = LeafNode::new(node_guard.data_mut());
            if from_right {
                sibling.move_first_to_end_of(&mut node);
                sibling.key_at(0)
            } else {
                sibling.move_last_to_front_of(&mut node);
                node.key_at(0)
            }
        } else {
            let (middle_key, new_separator) = {
                let parent_guard = ctx.write_set.last().expect("parent latch retained");
                let parent = InternalNodeRef::new(parent_guard.data());
                let sibling = InternalNodeRef::new(sibling_guard.data());
                if from_right {
                    (parent.key_at(sibling_index), sibling.key_at(1))
                } else {
                    (
                        parent.key_at(parent_index),
                        sibling.key_at(sibling.size() - 1),
                    )
                }
            };
            {
                let mut sibling = InternalNode::new(sibling_guard.data_mut());
                let mut node = InternalNode::new(node_guard.data_mut());
                if from_right {
                    sibling.move_first_to_end_of(&mut node, &middle_key, self.bpm.as_ref())?;
                } else {
                    sibling.move_last_to_front_of(&mut node, &middle_key, self.bpm.as_ref())?;
                }
            }
            new_separator
        };

        let parent_guard = ctx.write_set.last_mut().expect("parent latch retained");
        let mut parent = InternalNode::new(parent_guard.data_mut());
        parent.set_key_at(separator_index, &new_separator);

        debug!(
            node = node_guard.page_id().as_u32(),
            sibling = sibling_guard.page_id().as_u32(),
            "redistributed one entry between siblings"
        );
        Ok(())
    }

    /// Shrinks the tree after a recursive underflow reached the root:
    /// an internal root left with a single child hands the tree to that
    /// child.
    fn adjust_root(&self, ctx: &mut Context<'_>, root_page_guard: WritePageGuard) -> Result<()> {
        let (is_leaf, size) = {
            let page = BTreePageRef::new(root_page_guard.data());
            (page.is_leaf(), page.size())
        };

        if !is_leaf && size == 1 {
            let child_id = InternalNodeRef::new(root_page_guard.data()).value_at(0);
            let old_root_id = root_page_guard.page_id();
            drop(root_page_guard);

            {
                let mut child_guard = self.bpm.fetch_page_write(child_id)?;
                BTreePageMut::new(child_guard.data_mut()).set_parent_page_id(INVALID_PAGE_ID);
            }
            self.delete_node_page(old_root_id)?;

            let root = ctx
                .root_guard
                .as_mut()
                .expect("root id latch held across root collapse");
            **root = child_id;
            debug!(
                root = child_id.as_u32(),
                "collapsed root into its only child"
            );
        }
        Ok(())
    }
}
