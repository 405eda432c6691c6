//! End-to-end allocate/free/reopen scenarios
//!
//! Exercises the persisted free list against a real memory-mapped file:
//! sequential growth, LIFO reuse, overflow-node chaining, reclaim of drained
//! chain nodes, and on-disk format rejection.

use blockfile::{BlockFile, BlockFileError, HEADER_SIZE};
use std::fs;
use tempfile::tempdir;

#[test]
fn sequential_allocation_grows_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seq.blocks");

    let mut bf = BlockFile::create_with_block_size(&path, 32).unwrap();
    assert_eq!(bf.block_size(), 32);
    assert_eq!(fs::metadata(&path).unwrap().len(), 32);

    for expected in 1..=5 {
        assert_eq!(bf.allocate().unwrap(), expected);
    }
    bf.close().unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 6 * 32);
}

#[test]
fn freed_blocks_come_back_lifo() {
    let dir = tempdir().unwrap();
    let mut bf = BlockFile::create_with_block_size(dir.path().join("lifo.blocks"), 32).unwrap();

    bf.allocate_blocks(5).unwrap();
    bf.free(2).unwrap();
    bf.free(1).unwrap();

    assert_eq!(bf.allocate().unwrap(), 1);
    assert_eq!(bf.allocate().unwrap(), 2);
    assert_eq!(bf.allocate().unwrap(), 6);
}

#[test]
fn block_contents_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("content.blocks");

    let block = {
        let mut bf = BlockFile::create_with_block_size(&path, 64).unwrap();
        let block = bf.allocate().unwrap();
        bf.map_block(block, |bytes| {
            bytes[..11].copy_from_slice(b"hello block");
            Ok(())
        })
        .unwrap();
        bf.close().unwrap();
        block
    };

    let mut bf = BlockFile::open(&path).unwrap();
    bf.map_block(block, |bytes| {
        assert_eq!(&bytes[..11], b"hello block");
        Ok(())
    })
    .unwrap();
}

// With a 32-byte block the free-list capacity is (32 - 20) / 4 = 3, so
// freeing 1..=10 in order fills the root with [1, 2, 3], recruits block 4 as
// an overflow node holding [5, 6, 7], then recruits block 8 holding [9, 10]:
//
//   root [1,2,3] -> 8 [9,10] -> 4 [5,6,7]
//
// Draining pops the root stack, then each overflow node's stack, then
// reclaims the drained node itself before the file grows.
#[test]
fn overflow_chain_builds_and_drains_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chain.blocks");

    {
        let mut bf = BlockFile::create_with_block_size(&path, 32).unwrap();
        let blocks = bf.allocate_blocks(10).unwrap();
        assert_eq!(blocks, (1..=10).collect::<Vec<_>>());

        for block in 1..=10 {
            bf.free(block).unwrap();
        }
        bf.close().unwrap();
    }

    // Reopen: the chain was persisted, and draining reproduces the exact
    // order, including the consume-as-storage reclaim of blocks 8 and 4.
    let mut bf = BlockFile::open(&path).unwrap();
    for expected in [3, 2, 1, 10, 9, 8, 7, 6, 5, 4, 11] {
        assert_eq!(bf.allocate().unwrap(), expected);
    }
}

#[test]
fn reopen_matches_an_unclosed_peer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("peer.blocks");

    // Same operation sequence against a file that stays open...
    let mut live = BlockFile::create_with_block_size(dir.path().join("live.blocks"), 32).unwrap();
    // ...and against one that is closed and reopened midway.
    let mut reopened = BlockFile::create_with_block_size(&path, 32).unwrap();

    for bf in [&mut live, &mut reopened] {
        bf.allocate_blocks(7).unwrap();
        bf.free_blocks(&[2, 6, 4, 1, 7]).unwrap();
    }

    reopened.close().unwrap();
    let mut reopened = BlockFile::open(&path).unwrap();

    for _ in 0..8 {
        assert_eq!(reopened.allocate().unwrap(), live.allocate().unwrap());
    }
}

#[test]
fn minimum_block_size_chains_every_free() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiny.blocks");

    // 20-byte blocks hold the header and nothing else: capacity 0, so every
    // free turns the block itself into an overflow node.
    let mut bf = BlockFile::create_with_block_size(&path, HEADER_SIZE as u32).unwrap();
    bf.allocate_blocks(4).unwrap();
    bf.free_blocks(&[1, 2, 3, 4]).unwrap();
    bf.close().unwrap();

    let mut bf = BlockFile::open(&path).unwrap();
    for expected in [4, 3, 2, 1, 5] {
        assert_eq!(bf.allocate().unwrap(), expected);
    }
}

#[test]
fn root_block_is_never_client_addressable() {
    let dir = tempdir().unwrap();
    let mut bf = BlockFile::create_with_block_size(dir.path().join("root.blocks"), 32).unwrap();

    assert!(matches!(
        bf.map_block(0, |_| Ok(())),
        Err(BlockFileError::RootBlockReserved)
    ));
    assert!(matches!(bf.free(0), Err(BlockFileError::RootBlockReserved)));

    // Past-the-end blocks fail the mapper's range check.
    assert!(matches!(
        bf.map_block(7, |_| Ok(())),
        Err(BlockFileError::OutOfRange { .. })
    ));
}

fn raw_header(magic: [u8; 4], block_size: u32, free_len: u32, free_head: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&magic);
    bytes.extend_from_slice(&block_size.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // next
    bytes.extend_from_slice(&free_len.to_le_bytes());
    bytes.extend_from_slice(&free_head.to_le_bytes());
    bytes.resize(block_size as usize, 0);
    bytes
}

#[test]
fn foreign_endian_file_is_rejected_as_foreign() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("foreign.blocks");

    // Magic written in the opposite byte order, as the raw-struct writer
    // would produce on a big-endian host.
    fs::write(&path, raw_header([0xB1, 0x0C, 0xF1, 0x1E], 32, 3, 0)).unwrap();

    assert!(matches!(
        BlockFile::open(&path),
        Err(BlockFileError::ForeignPlatform)
    ));
}

#[test]
fn garbage_magic_is_rejected_as_bad_magic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("garbage.blocks");
    fs::write(&path, raw_header(*b"NOPE", 32, 3, 0)).unwrap();

    assert!(matches!(
        BlockFile::open(&path),
        Err(BlockFileError::BadMagic)
    ));
}

#[test]
fn corrupt_free_list_counts_are_rejected() {
    let dir = tempdir().unwrap();

    // count > capacity
    let path = dir.path().join("overfull.blocks");
    fs::write(&path, raw_header([0x1E, 0xF1, 0x0C, 0xB1], 32, 3, 4)).unwrap();
    assert!(matches!(
        BlockFile::open(&path),
        Err(BlockFileError::CorruptFreeList {
            count: 4,
            capacity: 3
        })
    ));

    // capacity too large for the block
    let path = dir.path().join("oversized.blocks");
    fs::write(&path, raw_header([0x1E, 0xF1, 0x0C, 0xB1], 32, 100, 0)).unwrap();
    assert!(matches!(
        BlockFile::open(&path),
        Err(BlockFileError::CapacityOverflow { .. })
    ));
}

#[test]
fn truncated_file_is_smaller_than_its_block_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.blocks");

    // Valid root header claiming 4096-byte blocks, but only 20 bytes of file.
    let mut bytes = raw_header([0x1E, 0xF1, 0x0C, 0xB1], 4096, 1019, 0);
    bytes.truncate(HEADER_SIZE);
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        BlockFile::open(&path),
        Err(BlockFileError::MapperTooSmall { .. })
    ));
}
