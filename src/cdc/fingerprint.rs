use super::types::{Row, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Digest of a row's column names and values.
///
/// Only ever compared for equality; never reversed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

const FIELD_SEP: u8 = 0x1f;
const RECORD_SEP: u8 = 0x1e;

/// Computes the fingerprint of a row, walking columns in row order.
///
/// Every value carries a type tag so `"1"` and `1` differ, and timestamps
/// hash their canonical UTC form so the offset they were read with does not
/// matter.
pub fn fingerprint(row: &Row) -> Fingerprint {
    let mut hasher = Sha256::new();
    for (name, value) in row.iter() {
        hasher.update(name.as_bytes());
        hasher.update([FIELD_SEP]);
        hash_value(&mut hasher, value);
        hasher.update([RECORD_SEP]);
    }
    Fingerprint(hasher.finalize().into())
}

fn hash_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Integer(i) => {
            hasher.update(b"i");
            hasher.update(i.to_be_bytes());
        }
        Value::Float(f) => {
            // -0.0 == 0.0
            let f = if *f == 0.0 { 0.0 } else { *f };
            hasher.update(b"f");
            hasher.update(f.to_bits().to_be_bytes());
        }
        Value::Boolean(b) => {
            hasher.update(b"b");
            hasher.update([u8::from(*b)]);
        }
        Value::Timestamp(ts) => {
            let canonical = Value::canonical_timestamp(ts);
            hasher.update(b"t");
            hasher.update((canonical.len() as u64).to_be_bytes());
            hasher.update(canonical.as_bytes());
        }
        Value::Null => hasher.update(b"n"),
    }
}
