use std::io::Write;
use std::sync::Arc;

use cinder::buffer::BufferPoolManager;
use cinder::common::{BTreeConfig, PageId, RecordId, SlotId};
use cinder::index::{BPlusTree, IntegerComparator};
use cinder::storage::disk::DiskManager;

fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}:{} - {}",
                record.level(),
                record.target(),
                record.file().unwrap_or("<unknown>"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init();
}

fn key(k: u32) -> [u8; 4] {
    k.to_le_bytes()
}

fn main() -> cinder::Result<()> {
    init_logger();

    println!("Cinder - storage engine core in Rust");
    println!("====================================\n");

    let db_path = std::env::temp_dir().join(format!("cinder-demo-{}.db", std::process::id()));

    {
        let disk_manager = Arc::new(DiskManager::new(&db_path)?);
        println!("Created disk manager for: {}", db_path.display());

        // Small pool and small nodes so the tree spans many pages
        let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
        println!("Created buffer pool manager with {} frames\n", bpm.pool_size());

        let tree = BPlusTree::new(
            "demo_index",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            BTreeConfig::new(4, 8, 8),
        )?;

        for k in 0..200u32 {
            let rid = RecordId::new(PageId::new(1000 + k / 50), SlotId::new((k % 50) as u16));
            tree.insert(&key(k), rid)?;
        }
        println!("Inserted 200 keys, root is {}", tree.root_page_id());

        for k in (0..200u32).filter(|k| k % 2 == 1) {
            tree.remove(&key(k))?;
        }
        println!("Removed odd keys, root is {}", tree.root_page_id());
        tree.verify_integrity()?;

        println!("\nRange scan [40, 60]:");
        for (k, rid) in tree.range_scan(&key(40), &key(60))? {
            println!("  - {} -> {}", u32::from_le_bytes([k[0], k[1], k[2], k[3]]), rid);
        }

        bpm.flush_all_pages()?;
        println!(
            "\nFlushed to disk ({} reads, {} writes)",
            bpm.disk_manager().num_reads(),
            bpm.disk_manager().num_writes()
        );
    }

    std::fs::remove_file(&db_path).ok();
    println!("\nDemo completed successfully!");
    Ok(())
}
