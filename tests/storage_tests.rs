// REAL Storage Tests
// Wallet store on a temporary RocksDB: encodings, atomic batches and key layout.

use std::collections::{BTreeMap, HashMap};

use tempfile::TempDir;

use ctcwallet::{
    storage::{KeySpace, Store},
    WalletError,
};

fn open() -> (TempDir, Store) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Store::open(dir.path().join("db").to_str().expect("utf8 path")).expect("Failed to open store");
    (dir, store)
}

#[test]
fn test_store_encodings() {
    println!("🧪 Testing bincode, JSON and raw values...");
    let (_dir, store) = open();

    store.put("height", &42u64).expect("put");
    assert_eq!(store.get::<u64>("height").expect("get"), Some(42));
    assert_eq!(store.get::<u64>("missing").expect("get"), None);

    store.put_raw("raw", &[1, 2, 3]).expect("put raw");
    assert_eq!(store.get_raw("raw").expect("get raw"), Some(vec![1, 2, 3]));

    let mut idx = BTreeMap::new();
    idx.insert("0x0000000000000000000000000000000000000000".to_string(), 17u64);
    let mut batch = store.batch();
    batch.put_json("gOutIndex", &idx);
    store.write_batch(batch).expect("write");
    let raw = store.get_raw("gOutIndex").expect("get").expect("present");
    assert!(raw.starts_with(b"{\""), "maps shared with other tools are JSON");
    assert_eq!(store.get_json::<BTreeMap<String, u64>>("gOutIndex").expect("json"), Some(idx));
    println!("  ✅ Each encoding reads back");

    // : compressed records written by older builds still load
    let packed = zstd::encode_all(&bincode::serialize(&vec![7u32, 8, 9]).expect("bincode")[..], 3).expect("zstd");
    store.put_raw("packed", &packed).expect("put");
    assert_eq!(store.get::<Vec<u32>>("packed").expect("get"), Some(vec![7, 8, 9]));

    store.put_raw("garbage", b"\xff").expect("put");
    assert!(store.get::<String>("garbage").is_err());
    println!("  ✅ Compressed records accepted, corrupt ones reported");
}

#[test]
fn test_batch_is_all_or_nothing() {
    println!("🧪 Testing atomic batch writes...");
    let (_dir, store) = open();
    store.put("keep", &1u64).expect("put");

    let mut batch = store.batch();
    batch.put("a", &1u64);
    batch.put("b", &2u64);
    batch.delete("keep");
    assert_eq!(batch.len(), 3);
    store.write_batch(batch).expect("write");
    assert_eq!(store.get::<u64>("b").expect("get"), Some(2));
    assert_eq!(store.get::<u64>("keep").expect("get"), None);

    // : a value JSON cannot encode poisons the whole batch
    let mut bad_map = HashMap::new();
    bad_map.insert([1u8, 2u8], 3u8);
    let mut batch = store.batch();
    batch.put("c", &3u64);
    batch.put_json("bad", &bad_map);
    batch.delete("a");
    assert!(matches!(store.write_batch(batch), Err(WalletError::BatchSaveFail(_))));
    assert_eq!(store.get::<u64>("c").expect("get"), None, "nothing of a failed batch is written");
    assert_eq!(store.get::<u64>("a").expect("get"), Some(1));
    println!("  ✅ Failed batches leave the store untouched");
}

#[test]
fn test_key_space_layout() {
    println!("🧪 Testing per-wallet key names...");
    let (_dir, store) = open();
    let alice = KeySpace::new(&[0xaa; 20]);
    let bob = KeySpace::new(&[0xbb; 20]);
    let hash = [0x01; 32];

    assert_eq!(alice.local_height(), format!("0x{}_localHeight", "aa".repeat(20)));
    assert_eq!(alice.transfer(3), format!("0x{}_transfers_3", "aa".repeat(20)));
    assert_eq!(alice.tx_keys(&hash), format!("0x{}_{}_txKeys", "aa".repeat(20), "01".repeat(32)));
    assert!(alice.utxo_tx(&hash).ends_with(&format!("utxoTx_{}", "01".repeat(32))));

    for n in 0..5 {
        store.put(&alice.transfer(n), &(n as u64)).expect("put");
    }
    store.put(&bob.transfer(0), &99u64).expect("put");
    store.put(&alice.local_height(), &5u64).expect("put");

    let alice_keys = store.keys_with_prefix(alice.prefix()).expect("scan");
    assert_eq!(alice_keys.len(), 6);
    assert!(alice_keys.iter().all(|k| k.starts_with(alice.prefix())));
    assert_eq!(store.keys_with_prefix(bob.prefix()).expect("scan"), vec![bob.transfer(0)]);
    println!("  ✅ Wallets sharing a store stay separate");

    store.close().expect("close");
}
