use crate::storage::in_memory::InMemoryStorage;
use crate::storage::Storage;

#[test]
fn test_in_memory_storage() {
    let mut mem = InMemoryStorage::default();
    mem.write(b"key", b"xxx");
    assert_eq!(mem.read(b"key"), Some(&b"xxx"[..]));
    assert_eq!(mem.remove(b"key"), 1);
    assert_eq!(mem.remove(b"key"), 0);
    assert_eq!(mem.read(b"does not exist"), None);
}

#[test]
fn test_dbsize() {
    let mut mem = InMemoryStorage::default();
    mem.write(b"key", b"xxx");
    assert_eq!(mem.size(), 1);
    assert_eq!(mem.remove(b"key"), 1);
    assert_eq!(mem.size(), 0);
    mem.write(b"key", b"xxx");
    mem.write(b"key2", b"xxx");
    assert_eq!(mem.size(), 2);
}

#[test]
fn test_dump_restore() {
    let mut source = InMemoryStorage::default();
    let mut target = InMemoryStorage::default();

    source.write(b"key", b"value");
    let payload = source.dump(b"key").unwrap();
    assert_eq!(source.dump(b"missing"), None);

    target.restore(b"key", &payload).unwrap();
    assert_eq!(target.read(b"key"), Some(&b"value"[..]));
}

#[test]
fn test_restore_rejects_bad_payload() {
    let mut mem = InMemoryStorage::default();
    assert!(mem.restore(b"key", b"").is_err());
    assert!(mem.restore(b"key", b"\x7fgarbage").is_err());
    assert!(!mem.contains(b"key"));
}
