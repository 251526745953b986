//! End-to-end persistence tests: build an index, write it back, reopen the
//! file in a fresh session and check that every entry survived.

use oakdb::index::LongLongIndex;
use oakdb::storage::MmapChannel;
use tempfile::NamedTempFile;

#[test]
fn multi_level_tree_survives_reopen() {
    let temp = NamedTempFile::new().unwrap();

    {
        let channel = MmapChannel::create(temp.path(), 4096).unwrap();
        let mut index = LongLongIndex::create_with_order(channel, 8, 8).unwrap();

        for key in 0..2000 {
            index.add_long(key, key * 3 + 1).unwrap();
        }
        assert!(index.leaf_count() > 100, "tree should be multi-level");

        let root = index.write().unwrap();
        index.channel_mut().set_root_page(root).unwrap();
    }

    let channel = MmapChannel::open(temp.path()).unwrap();
    let root = channel.root_page().unwrap();
    assert_ne!(root, 0);

    let mut index = LongLongIndex::open_with_order(channel, root, 8, 8).unwrap();
    assert_eq!(index.validate().unwrap(), 2000);
    for key in 0..2000 {
        assert_eq!(index.find_value(key).unwrap(), Some(key * 3 + 1), "key {}", key);
    }
    assert_eq!(index.find_value(2000).unwrap(), None);
    assert_eq!(index.max_key().unwrap(), 1999);
}

#[test]
fn reopened_tree_accepts_further_mutation() {
    let temp = NamedTempFile::new().unwrap();

    {
        let channel = MmapChannel::create(temp.path(), 4096).unwrap();
        let mut index = LongLongIndex::create_with_order(channel, 8, 8).unwrap();
        for key in 0..500 {
            index.add_long(key * 2, key).unwrap();
        }
        let root = index.write().unwrap();
        index.channel_mut().set_root_page(root).unwrap();
    }

    let channel = MmapChannel::open(temp.path()).unwrap();
    let root = channel.root_page().unwrap();
    let mut index = LongLongIndex::open_with_order(channel, root, 8, 8).unwrap();

    // Fill the odd keys and drop half the even ones.
    for key in 0..500 {
        index.add_long(key * 2 + 1, -key).unwrap();
    }
    for key in 0..250 {
        assert!(index.remove_long(key * 2).unwrap());
    }
    assert_eq!(index.validate().unwrap(), 750);

    let root = index.write().unwrap();
    index.channel_mut().set_root_page(root).unwrap();
    drop(index);

    let channel = MmapChannel::open(temp.path()).unwrap();
    let root = channel.root_page().unwrap();
    let mut index = LongLongIndex::open_with_order(channel, root, 8, 8).unwrap();
    assert_eq!(index.validate().unwrap(), 750);
    assert_eq!(index.find_value(0).unwrap(), None);
    assert_eq!(index.find_value(500).unwrap(), Some(250));
    assert_eq!(index.find_value(999).unwrap(), Some(-499));
}

#[test]
fn write_back_never_overwrites_the_previous_root() {
    let temp = NamedTempFile::new().unwrap();
    let channel = MmapChannel::create(temp.path(), 4096).unwrap();
    let mut index = LongLongIndex::create_with_order(channel, 8, 8).unwrap();

    for key in 0..100 {
        index.add_long(key, key).unwrap();
    }
    let first_root = index.write().unwrap();

    for key in 100..200 {
        index.add_long(key, key).unwrap();
    }
    let second_root = index.write().unwrap();
    assert_ne!(first_root, second_root);
    index.channel_mut().set_root_page(second_root).unwrap();
    drop(index);

    // The first committed tree is still intact at its old root.
    let channel = MmapChannel::open(temp.path()).unwrap();
    let mut old = LongLongIndex::open_with_order(channel, first_root, 8, 8).unwrap();
    assert_eq!(old.validate().unwrap(), 100);
    assert_eq!(old.find_value(150).unwrap(), None);

    let channel = MmapChannel::open(temp.path()).unwrap();
    let mut new = LongLongIndex::open_with_order(channel, second_root, 8, 8).unwrap();
    assert_eq!(new.validate().unwrap(), 200);
}

#[test]
fn default_page_size_handles_large_key_space() {
    let temp = NamedTempFile::new().unwrap();
    let channel = MmapChannel::create(temp.path(), 16384).unwrap();
    let mut index = LongLongIndex::create(channel).unwrap();

    // Spread keys across the i64 range, including the extremes.
    let mut keys = vec![i64::MIN, i64::MIN + 1, -1, 0, 1, i64::MAX - 1, i64::MAX];
    for i in 0..3000i64 {
        keys.push(i.wrapping_mul(0x9E3779B97F4A7C15u64 as i64));
    }
    for &key in &keys {
        index.add_long(key, !key).unwrap();
    }

    let root = index.write().unwrap();
    index.channel_mut().set_root_page(root).unwrap();
    drop(index);

    let channel = MmapChannel::open(temp.path()).unwrap();
    let root = channel.root_page().unwrap();
    let mut index = LongLongIndex::open(channel, root).unwrap();
    for &key in &keys {
        assert_eq!(index.find_value(key).unwrap(), Some(!key));
    }
    assert_eq!(index.max_key().unwrap(), *keys.iter().max().unwrap());
}

#[test]
fn ascending_prefix_deletion_survives_reopen() {
    let temp = NamedTempFile::new().unwrap();
    let channel = MmapChannel::create(temp.path(), 4096).unwrap();
    let mut index = LongLongIndex::create_with_order(channel, 8, 8).unwrap();

    for key in 1..=120 {
        index.add_long(key, key).unwrap();
    }

    // Left-to-right extent deletion empties the leftmost leaves and drains
    // their ancestors down to single-child inner pages. Persist and reopen
    // at each step to check the shrunken shape encodes faithfully.
    for key in 1..=60 {
        assert!(index.remove_long(key).unwrap());
        if key % 8 != 0 {
            continue;
        }

        let root = index.write().unwrap();
        index.channel_mut().set_root_page(root).unwrap();
        drop(index);

        let channel = MmapChannel::open(temp.path()).unwrap();
        let root = channel.root_page().unwrap();
        index = LongLongIndex::open_with_order(channel, root, 8, 8).unwrap();
        assert_eq!(
            index.validate().unwrap(),
            (120 - key) as u64,
            "after deleting 1..={}",
            key
        );
        assert_eq!(index.find_value(key).unwrap(), None);
        assert_eq!(index.find_value(key + 1).unwrap(), Some(key + 1));
        assert_eq!(index.find_value(120).unwrap(), Some(120));
    }
}

#[test]
fn open_with_unwritten_root_starts_empty() {
    let temp = NamedTempFile::new().unwrap();
    MmapChannel::create(temp.path(), 4096).unwrap();

    let channel = MmapChannel::open(temp.path()).unwrap();
    assert_eq!(channel.root_page().unwrap(), 0);

    let mut index = LongLongIndex::open_with_order(channel, 0, 8, 8).unwrap();
    assert_eq!(index.validate().unwrap(), 0);
    assert_eq!(index.max_key().unwrap(), i64::MIN);

    index.add_long(5, 50).unwrap();
    let root = index.write().unwrap();
    assert_ne!(root, 0);
    index.channel_mut().set_root_page(root).unwrap();
    drop(index);

    let channel = MmapChannel::open(temp.path()).unwrap();
    let root = channel.root_page().unwrap();
    let mut index = LongLongIndex::open_with_order(channel, root, 8, 8).unwrap();
    assert_eq!(index.find_value(5).unwrap(), Some(50));
}

#[test]
fn empty_index_roundtrips() {
    let temp = NamedTempFile::new().unwrap();

    {
        let channel = MmapChannel::create(temp.path(), 4096).unwrap();
        let mut index = LongLongIndex::create_with_order(channel, 8, 8).unwrap();
        let root = index.write().unwrap();
        index.channel_mut().set_root_page(root).unwrap();
    }

    let channel = MmapChannel::open(temp.path()).unwrap();
    let root = channel.root_page().unwrap();
    let mut index = LongLongIndex::open_with_order(channel, root, 8, 8).unwrap();
    assert_eq!(index.validate().unwrap(), 0);
    assert_eq!(index.max_key().unwrap(), i64::MIN);
    assert_eq!(index.find_value(1).unwrap(), None);
}
