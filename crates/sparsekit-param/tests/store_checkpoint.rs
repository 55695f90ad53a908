use sparsekit_checkpoint::CheckpointMetadata;
use sparsekit_core::{shard_for_key, FillPolicy, LocalResourceManager, StoreConfig};
use sparsekit_hash_table::SlotIndex;
use sparsekit_param::{ParamError, ParamInterface, RawParam, RecordBatch};
use std::sync::Arc;
use tempfile::tempdir;

fn store(devices: usize, capacity: usize, vector_size: usize, initializer: &str) -> RawParam {
    store_with_index(devices, capacity, vector_size, initializer, true)
}

fn identity_store(
    devices: usize,
    capacity: usize,
    vector_size: usize,
    initializer: &str,
) -> RawParam {
    store_with_index(devices, capacity, vector_size, initializer, false)
}

fn store_with_index(
    devices: usize,
    capacity: usize,
    vector_size: usize,
    initializer: &str,
    use_hashtable: bool,
) -> RawParam {
    let manager = Arc::new(LocalResourceManager::new(devices).unwrap());
    let buffers = manager.allocate_buffers(16 << 20);
    let param = RawParam::create(
        initializer,
        use_hashtable,
        &[capacity, vector_size],
        manager,
        buffers,
        "item",
        true,
    )
    .unwrap();
    param.init_all().unwrap();
    param
}

/// Inserts `keys` on their owning devices and gives each a distinct vector.
fn populate(param: &RawParam, keys: &[i64]) {
    let dim = param.get_embedding_vec_size();
    let mut batch = RecordBatch::new(dim);
    for &key in keys {
        let vector: Vec<f32> = (0..dim).map(|j| key as f32 * 0.25 + j as f32).collect();
        batch.push(key, &vector).unwrap();
    }
    for (device, routed) in param.route_keys(keys).iter().enumerate() {
        param.lookup_or_insert(device, routed).unwrap();
    }
    param.load_embedding_values(&[batch]).unwrap();
}

fn vector_of(param: &RawParam, key: i64) -> Vec<f32> {
    let device = shard_for_key(key, param.device_count());
    param.gather(device, &[key]).unwrap()
}

fn live_total(param: &RawParam) -> usize {
    (0..param.device_count())
        .map(|d| param.num_live_keys(d).unwrap())
        .sum()
}

#[test]
fn test_four_slot_scenario() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("item.emb");

    let param = store(1, 4, 2, "zeros");
    let slots = param.lookup_or_insert(0, &[10, 20, 10, 30]).unwrap();
    assert_eq!(slots, vec![0, 1, 0, 2]);
    assert_eq!(param.gather(0, &[10, 20, 30]).unwrap(), vec![0.0; 6]);

    param.dump_to_file(&path).unwrap();

    // Same device count.
    let restored = store(1, 4, 2, "ones");
    restored.restore_from_file(&path).unwrap();
    for key in [10, 20, 30] {
        assert_eq!(restored.gather(0, &[key]).unwrap(), vec![0.0, 0.0]);
    }

    // Two devices: each key lands in exactly one shard.
    let resharded = store(2, 4, 2, "ones");
    resharded.restore_from_file(&path).unwrap();
    for key in [10i64, 20, 30] {
        let owners: Vec<usize> = (0..2)
            .filter(|&d| resharded.gather(d, &[key]).is_ok())
            .collect();
        assert_eq!(owners, vec![shard_for_key(key, 2)]);
    }
    assert_eq!(live_total(&resharded), 3);
}

#[test]
fn test_round_trip_same_device_count() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("item.emb");
    let keys: Vec<i64> = (-20..40).map(|k| k * 7919).collect();

    let param = store(3, 64, 5, "uniform");
    populate(&param, &keys);
    param.dump_to_file(&path).unwrap();

    let meta = CheckpointMetadata::read(&path).unwrap().unwrap();
    assert_eq!(meta.var_name, "item");
    assert_eq!(meta.num_records, keys.len());
    assert_eq!(meta.num_devices, 3);

    let restored = store(3, 64, 5, "zeros");
    restored.restore_from_file(&path).unwrap();
    for &key in &keys {
        assert_eq!(vector_of(&restored, key), vector_of(&param, key));
    }
    assert_eq!(live_total(&restored), keys.len());
}

#[test]
fn test_reshard_one_to_two_and_two_to_three() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("one.emb");
    let second = dir.path().join("two.emb");
    let keys: Vec<i64> = (0..50).collect();

    let one = store(1, 64, 3, "zeros");
    populate(&one, &keys);
    one.dump_to_file(&first).unwrap();

    let two = store(2, 64, 3, "zeros");
    two.restore_from_file(&first).unwrap();
    assert_eq!(live_total(&two), keys.len());
    for &key in &keys {
        assert_eq!(vector_of(&two, key), vector_of(&one, key));
    }
    two.dump_to_file(&second).unwrap();

    let three = store(3, 64, 3, "zeros");
    three.restore_from_file(&second).unwrap();
    assert_eq!(live_total(&three), keys.len());
    for &key in &keys {
        let holders = (0..3)
            .filter(|&d| three.gather(d, &[key]).is_ok())
            .count();
        assert_eq!(holders, 1, "key {key} must live on exactly one device");
        assert_eq!(vector_of(&three, key), vector_of(&one, key));
    }
}

#[test]
fn test_restore_keeps_slot_indices_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("item.emb");

    let param = store(1, 8, 1, "zeros");
    param.lookup_or_insert(0, &[5, 6, 7]).unwrap();
    param.dump_to_file(&path).unwrap();
    param.restore_from_file(&path).unwrap();

    let first = param.lookup_or_insert(0, &[7, 5]).unwrap();
    for _ in 0..5 {
        assert_eq!(param.lookup_or_insert(0, &[7, 5]).unwrap(), first);
    }
    assert_eq!(param.num_live_keys(0).unwrap(), 3);
}

#[test]
fn test_capacity_exceeded_without_partial_mutation() {
    let param = store(1, 4, 2, "zeros");
    param.lookup_or_insert(0, &[1, 2, 3, 4]).unwrap();

    let err = param.lookup_or_insert(0, &[1, 5]).unwrap_err();
    assert!(matches!(err, ParamError::CapacityExceeded { device: 0, .. }));
    assert_eq!(param.num_live_keys(0).unwrap(), 4);
    assert!(matches!(
        param.gather(0, &[5]),
        Err(ParamError::KeyNotFound { key: 5, .. })
    ));

    // Known keys still resolve.
    assert_eq!(param.lookup_or_insert(0, &[4, 1]).unwrap(), vec![3, 0]);
}

#[test]
fn test_restore_over_capacity_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("big.emb");

    let big = store(1, 16, 2, "zeros");
    populate(&big, &(0..10).collect::<Vec<_>>());
    big.dump_to_file(&path).unwrap();

    let small = store(1, 4, 2, "zeros");
    populate(&small, &[100, 200]);
    let before = small.gather(0, &[100, 200]).unwrap();

    let err = small.restore_from_file(&path).unwrap_err();
    assert!(matches!(err, ParamError::CapacityExceeded { device: 0, .. }));
    assert_eq!(small.num_live_keys(0).unwrap(), 2);
    assert_eq!(small.gather(0, &[100, 200]).unwrap(), before);
}

#[test]
fn test_restore_vector_size_mismatch_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("item.emb");

    let wide = store(1, 8, 4, "zeros");
    populate(&wide, &[1, 2]);
    wide.dump_to_file(&path).unwrap();

    let narrow = store(1, 8, 2, "zeros");
    populate(&narrow, &[9]);
    assert!(matches!(
        narrow.restore_from_file(&path),
        Err(ParamError::CorruptCheckpoint { .. })
    ));
    assert_eq!(narrow.num_live_keys(0).unwrap(), 1);
}

#[test]
fn test_restore_truncated_file_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("item.emb");

    let param = store(1, 8, 2, "zeros");
    populate(&param, &[1, 2, 3]);
    param.dump_to_file(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

    assert!(matches!(
        param.restore_from_file(&path),
        Err(ParamError::CorruptCheckpoint { .. })
    ));
    assert_eq!(param.num_live_keys(0).unwrap(), 3);
}

#[test]
fn test_restore_missing_file() {
    let dir = tempdir().unwrap();
    let param = store(1, 8, 2, "zeros");
    assert!(matches!(
        param.restore_from_file(&dir.path().join("absent.emb")),
        Err(ParamError::Checkpoint(_))
    ));
}

#[test]
fn test_restore_initializes_fresh_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("item.emb");

    let source = store(1, 8, 2, "zeros");
    populate(&source, &[1, 2]);
    source.dump_to_file(&path).unwrap();

    let manager = Arc::new(LocalResourceManager::new(1).unwrap());
    let buffers = manager.allocate_buffers(1 << 20);
    let target =
        RawParam::create_from_config(StoreConfig::new("item", [8, 2]), manager, buffers).unwrap();
    assert!(!target.is_initialized(0).unwrap());

    target.restore_from_file(&path).unwrap();
    assert!(target.is_initialized(0).unwrap());
    assert_eq!(target.gather(0, &[2]).unwrap(), vector_of(&source, 2));
}

#[test]
fn test_load_embedding_values_inserts_and_overwrites() {
    let param = store(2, 16, 2, "zeros");
    populate(&param, &[1, 2]);

    let mut batch = RecordBatch::new(2);
    batch.push(2, &[9.0, 9.0]).unwrap();
    batch.push(3, &[3.0, 3.0]).unwrap();
    param.load_embedding_values(&[batch]).unwrap();

    assert_eq!(vector_of(&param, 2), vec![9.0, 9.0]);
    assert_eq!(vector_of(&param, 3), vec![3.0, 3.0]);
    assert_eq!(vector_of(&param, 1), vec![0.25, 1.25]);
    assert_eq!(live_total(&param), 3);
}

#[test]
fn test_load_embedding_values_is_all_or_nothing() {
    let param = store(1, 2, 1, "zeros");
    populate(&param, &[1]);

    let batch = RecordBatch::from_parts(1, vec![1, 2, 3], vec![5.0, 6.0, 7.0]).unwrap();
    assert!(matches!(
        param.load_embedding_values(&[batch]),
        Err(ParamError::CapacityExceeded { .. })
    ));
    assert_eq!(param.num_live_keys(0).unwrap(), 1);
    assert_eq!(param.gather(0, &[1]).unwrap(), vec![0.25]);
}

#[test]
fn test_identity_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("small.emb");

    let param = identity_store(1, 8, 2, "ones");
    param.lookup_or_insert(0, &[1, 5, 7]).unwrap();
    param.apply_gradients(0, &[5], &[2.0, 4.0], 0.5).unwrap();
    param.dump_to_file(&path).unwrap();

    let restored = identity_store(1, 8, 2, "zeros");
    restored.restore_from_file(&path).unwrap();
    assert_eq!(restored.gather(0, &[1]).unwrap(), vec![1.0, 1.0]);
    assert_eq!(restored.gather(0, &[5]).unwrap(), vec![0.0, -1.0]);
    assert_eq!(restored.gather(0, &[7]).unwrap(), vec![1.0, 1.0]);

    let index = restored.get_hashtable(0).unwrap();
    for key in [1i64, 5, 7] {
        assert_eq!(index.read().slot_of(key), Some(key as usize));
    }
    assert_eq!(index.read().len(), 3);
}

#[test]
fn test_identity_reshard_one_to_two() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("small.emb");
    let keys: Vec<i64> = (0..8).collect();

    let one = identity_store(1, 8, 2, "zeros");
    populate(&one, &keys);
    one.dump_to_file(&path).unwrap();

    let two = identity_store(2, 8, 2, "zeros");
    two.restore_from_file(&path).unwrap();
    assert_eq!(live_total(&two), keys.len());
    for &key in &keys {
        let owner = shard_for_key(key, 2);
        assert_eq!(two.gather(owner, &[key]).unwrap(), vector_of(&one, key));
        assert!(two.gather(1 - owner, &[key]).is_err());
        let index = two.get_hashtable(owner).unwrap();
        assert_eq!(index.read().slot_of(key), Some(key as usize));
    }
}

#[test]
fn test_identity_restore_key_out_of_range() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wide.emb");

    let source = store(1, 16, 1, "zeros");
    populate(&source, &[2, 12]);
    source.dump_to_file(&path).unwrap();

    let target = identity_store(1, 8, 1, "zeros");
    target.lookup_or_insert(0, &[3]).unwrap();
    assert!(matches!(
        target.restore_from_file(&path),
        Err(ParamError::CapacityExceeded { device: 0, capacity: 8, .. })
    ));
    assert_eq!(target.num_live_keys(0).unwrap(), 1);
    assert!(target.gather(0, &[3]).is_ok());
    assert!(target.gather(0, &[2]).is_err());
}

#[test]
fn test_lazy_restore_leaves_free_slots_unfilled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("item.emb");

    let source = store(1, 4, 2, "zeros");
    populate(&source, &[42]);
    source.dump_to_file(&path).unwrap();

    let manager = Arc::new(LocalResourceManager::new(1).unwrap());
    let buffers = manager.allocate_buffers(1 << 20);
    let config = StoreConfig::new("item", [4, 2])
        .with_initializer("ones")
        .with_fill_policy(FillPolicy::Lazy);
    let target = RawParam::create_from_config(config, manager, buffers).unwrap();
    target.restore_from_file(&path).unwrap();

    assert_eq!(target.gather(0, &[42]).unwrap(), vector_of(&source, 42));
    let table = target.get_embedding_table_tensor(0).unwrap();
    for slot in 1..4 {
        assert_eq!(table.read().row(slot), &[0.0, 0.0]);
    }

    // New keys after restore are still filled on insert.
    assert_eq!(target.lookup_or_insert(0, &[7]).unwrap(), vec![1]);
    assert_eq!(target.gather(0, &[7]).unwrap(), vec![1.0, 1.0]);
}
