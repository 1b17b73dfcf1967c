//! Structural hashing of target identity fields.
//!
//! Produces a 64-bit FNV-1 fingerprint of a JSON-like structure:
//! - strings hash their UTF-8 bytes
//! - booleans hash a single byte, numbers their little-endian `f64` bytes
//! - `null` hashes as a little-endian `i64` zero
//! - sequences fold `ordered(acc, item)` in declared order
//! - maps XOR `ordered(key, value)` across entries, then `finish`
//! - records start from their type name and mix in each field by name
//!
//! Map folding is order independent, so two attribute maps with the same
//! entries always hash the same regardless of insertion or key order.

use serde_json::{Map, Value};

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1 (multiply, then XOR) over `bytes`.
pub fn fnv1(bytes: &[u8]) -> u64 {
  bytes
    .iter()
    .fold(OFFSET_BASIS, |hash, byte| hash.wrapping_mul(PRIME) ^ u64::from(*byte))
}

fn ordered(a: u64, b: u64) -> u64 {
  let mut buf = [0u8; 16];
  buf[..8].copy_from_slice(&a.to_le_bytes());
  buf[8..].copy_from_slice(&b.to_le_bytes());
  fnv1(&buf)
}

fn finish(a: u64) -> u64 {
  fnv1(&a.to_le_bytes())
}

pub fn hash_str(value: &str) -> u64 {
  fnv1(value.as_bytes())
}

pub fn hash_bool(value: bool) -> u64 {
  fnv1(&[u8::from(value)])
}

pub fn hash_number(value: f64) -> u64 {
  fnv1(&value.to_le_bytes())
}

pub fn hash_null() -> u64 {
  fnv1(&0i64.to_le_bytes())
}

/// Hash an arbitrary JSON value.
pub fn hash_value(value: &Value) -> u64 {
  match value {
    Value::Null => hash_null(),
    Value::Bool(b) => hash_bool(*b),
    Value::Number(n) => hash_number(n.as_f64().unwrap_or_default()),
    Value::String(s) => hash_str(s),
    Value::Array(items) => items.iter().fold(0, |acc, item| ordered(acc, hash_value(item))),
    Value::Object(map) => hash_map(map),
  }
}

/// Hash a JSON object. An empty map hashes to `finish(0)`.
pub fn hash_map(map: &Map<String, Value>) -> u64 {
  finish(
    map
      .iter()
      .fold(0, |acc, (key, value)| acc ^ ordered(hash_str(key), hash_value(value))),
  )
}

/// Incremental hasher for a named record.
///
/// ```ignore
/// let hash = StructHasher::new("RawTarget")
///   .field("Name", hash_str("example"))
///   .finish();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StructHasher {
  hash: u64,
}

impl StructHasher {
  pub fn new(type_name: &str) -> Self {
    Self {
      hash: hash_str(type_name),
    }
  }

  /// Mix one field into the record hash. Field order matters.
  pub fn field(mut self, name: &str, value_hash: u64) -> Self {
    self.hash ^= ordered(hash_str(name), value_hash);
    self.hash = finish(self.hash);
    self
  }

  pub fn finish(self) -> u64 {
    self.hash
  }
}
