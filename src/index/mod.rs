pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod key_comparator;

pub use btree_index::BTreeIndex;
pub use btree_iterator::IndexIterator;
pub use btree_page::{
    BTreePageMut, BTreePageRef, InternalNode, InternalNodeRef, LeafNode, LeafNodeRef, NodeType,
    DEFAULT_INTERNAL_MAX_SIZE, DEFAULT_LEAF_MAX_SIZE, INTERNAL_PAGE_SLOT_CNT, LEAF_PAGE_SLOT_CNT,
};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
