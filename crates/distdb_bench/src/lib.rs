//! Benchmark utilities.

use distdb_core::Entry;
use rand::Rng;

/// Generate random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` entries with zero-padded keys and random values.
pub fn generate_entries(count: usize, value_size: usize) -> Vec<Entry> {
    (0..count)
        .map(|i| Entry::new(format!("key-{i:06}"), random_data(value_size)))
        .collect()
}
