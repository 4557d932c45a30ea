use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

/// Width of a blueprint id in its canonical byte form.
pub const ID_BYTES: usize = 8;

/// 64-bit content digest identifying a test or a test-set.
///
/// The canonical form is the big-endian byte string produced by SHAKE256;
/// the `i64` inside is only the storage encoding (the high bit lands in the
/// sign bit). Ordering blueprint ids means ordering their raw bytes, which
/// differs from signed numeric order, so `Ord` is deliberately not derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlueprintId(i64);

impl BlueprintId {
    pub fn from_i64(raw: i64) -> Self {
        BlueprintId(raw)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn from_bytes(raw: [u8; ID_BYTES]) -> Self {
        BlueprintId(u64::from_be_bytes(raw) as i64)
    }

    pub fn to_bytes(self) -> [u8; ID_BYTES] {
        (self.0 as u64).to_be_bytes()
    }
}

impl fmt::Display for BlueprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0 as u64)
    }
}

fn shake64(input: &[u8]) -> BlueprintId {
    let mut hasher = Shake256::default();
    hasher.update(input);
    let mut out = [0u8; ID_BYTES];
    hasher.finalize_xof().read(&mut out);
    BlueprintId::from_bytes(out)
}

/// Id of a single test, derived from its title.
pub fn test_blueprint_id(title: &str) -> BlueprintId {
    shake64(title.as_bytes())
}

/// Members sorted ascending by raw digest bytes. Duplicates are kept: a run
/// that lists the same title twice produces a member list with multiplicity.
pub fn canonical_members(ids: &[BlueprintId]) -> Vec<BlueprintId> {
    let mut sorted = ids.to_vec();
    sorted.sort_by_key(|id| id.to_bytes());
    sorted
}

/// Id of a test-set, derived from the member ids. Order of the input does not
/// matter; the digest covers the canonical (byte-sorted) concatenation.
pub fn run_blueprint_id(members: &[BlueprintId]) -> BlueprintId {
    let canonical = canonical_members(members);
    let mut buf = Vec::with_capacity(canonical.len() * ID_BYTES);
    for id in &canonical {
        buf.extend_from_slice(&id.to_bytes());
    }
    shake64(&buf)
}
