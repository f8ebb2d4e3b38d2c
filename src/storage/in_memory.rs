use std::collections::HashMap;

use crate::storage::{BadPayload, RedisString, Storage};

/// The single version byte prefixed to dump payloads, bumped whenever the
/// encoding changes so stale payloads are refused on restore.
const DUMP_VERSION: u8 = 1;

#[derive(Default)]
pub struct InMemoryStorage {
    string_store: HashMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage {
            string_store: HashMap::new(),
        }
    }
}

impl Storage for InMemoryStorage {
    fn write(&mut self, key: &[u8], value: &[u8]) {
        self.string_store.insert(key.to_vec(), value.to_vec());
    }

    fn read(&mut self, key: &[u8]) -> Option<&[u8]> {
        self.string_store.get(key).map(|value| &value[..])
    }

    fn remove(&mut self, key: &[u8]) -> u32 {
        match self.string_store.remove(key) {
            Some(_) => 1,
            None => 0,
        }
    }

    fn contains(&mut self, key: &[u8]) -> bool {
        self.string_store.contains_key(key)
    }

    fn size(&self) -> u64 {
        self.string_store.len() as u64
    }

    fn dump(&mut self, key: &[u8]) -> Option<RedisString> {
        self.string_store.get(key).map(|value| {
            let mut payload = Vec::with_capacity(value.len() + 1);
            payload.push(DUMP_VERSION);
            payload.extend_from_slice(value);
            payload
        })
    }

    fn restore(&mut self, key: &[u8], payload: &[u8]) -> Result<(), BadPayload> {
        match payload.split_first() {
            Some((&DUMP_VERSION, value)) => {
                self.string_store.insert(key.to_vec(), value.to_vec());
                Ok(())
            }
            _ => Err(BadPayload),
        }
    }
}
