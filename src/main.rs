use std::sync::Arc;

use taproot::buffer::BufferPoolManager;
use taproot::index::{BTreeIndex, IntegerComparator};
use taproot::storage::disk::DiskManager;
use taproot::{PageId, RecordId, SlotId};

fn main() {
    println!("Taproot - a disk-resident B+ tree index");
    println!("=======================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(16, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    let index = BTreeIndex::new(bpm.clone(), Arc::new(IntegerComparator));

    // Index a handful of keys
    for n in [42u64, 7, 19, 3, 88, 51, 64, 25] {
        let rid = RecordId::new(PageId::new(n as u32), SlotId::new(0));
        index.insert(&n.to_le_bytes(), rid).expect("insert failed");
        println!("Inserted key {}", n);
    }

    // Point lookup
    let probe = 19u64;
    match index.get_value(&probe.to_le_bytes()).expect("lookup failed") {
        Some(rid) => println!("\nget_value({}) -> {:?}", probe, rid),
        None => println!("\nget_value({}) -> absent", probe),
    }

    // Ordered scan over the leaf chain
    println!("\nFull scan in key order:");
    for item in index.begin().expect("scan failed") {
        let (key, rid) = item.expect("scan failed");
        println!("  {} -> {:?}", u64::from_le_bytes(key), rid);
    }

    // Remove a couple of keys and scan again
    for n in [7u64, 88] {
        index.remove(&n.to_le_bytes()).expect("remove failed");
        println!("\nRemoved key {}", n);
    }

    println!("\nScan after removals:");
    for item in index.begin().expect("scan failed") {
        let (key, rid) = item.expect("scan failed");
        println!("  {} -> {:?}", u64::from_le_bytes(key), rid);
    }

    bpm.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
