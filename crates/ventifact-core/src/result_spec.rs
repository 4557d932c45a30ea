//! Compact encoding of a run's pass/fail vector.
//!
//! Almost every run passes every test, so the encoding enumerates only the
//! minority outcome: an absent payload means "all passed", otherwise a one
//! byte variant tag is followed by the 8-byte ids of the enumerated tests.

use std::collections::HashSet;

use thiserror::Error;

use crate::digest::{BlueprintId, ID_BYTES};

/// Variant tag: the payload enumerates the tests that failed.
pub const VARIANT_FAILURES: u8 = 0x00;
/// Variant tag: the payload enumerates the tests that passed.
pub const VARIANT_PASSES: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload of {len} bytes is not of the form 1 + 8k")]
    BadLength { len: usize },
    #[error("unknown variant tag {0:#04x}")]
    BadVariant(u8),
    #[error("payload enumerates test {0} which is not a member of the run blueprint")]
    ForeignMember(BlueprintId),
}

/// Encodes per-test outcomes, in run order. Returns `None` when every test
/// passed (persisted as SQL NULL). Enumerates passes only when they are the
/// strict minority; a tie enumerates failures.
pub fn encode(results: &[(BlueprintId, bool)]) -> Option<Vec<u8>> {
    let failed = results.iter().filter(|(_, passed)| !passed).count();
    if failed == 0 {
        return None;
    }
    let passed = results.len() - failed;
    let enumerate_passes = passed < failed;

    let count = if enumerate_passes { passed } else { failed };
    let mut spec = Vec::with_capacity(1 + count * ID_BYTES);
    spec.push(if enumerate_passes {
        VARIANT_PASSES
    } else {
        VARIANT_FAILURES
    });
    for (id, passed) in results {
        if *passed == enumerate_passes {
            spec.extend_from_slice(&id.to_bytes());
        }
    }
    Some(spec)
}

/// Decodes a stored spec against the run blueprint's member list, yielding
/// one outcome per member (duplicated members share their outcome).
pub fn decode(spec: Option<&[u8]>, members: &[BlueprintId]) -> Result<Vec<bool>, DecodeError> {
    let Some(payload) = spec else {
        return Ok(vec![true; members.len()]);
    };
    if payload.is_empty() || (payload.len() - 1) % ID_BYTES != 0 {
        return Err(DecodeError::BadLength {
            len: payload.len(),
        });
    }
    let variant = payload[0];
    if variant != VARIANT_FAILURES && variant != VARIANT_PASSES {
        return Err(DecodeError::BadVariant(variant));
    }

    let mut enumerated = HashSet::with_capacity((payload.len() - 1) / ID_BYTES);
    for chunk in payload[1..].chunks_exact(ID_BYTES) {
        let mut raw = [0u8; ID_BYTES];
        raw.copy_from_slice(chunk);
        enumerated.insert(BlueprintId::from_bytes(raw));
    }
    for id in &enumerated {
        if !members.contains(id) {
            return Err(DecodeError::ForeignMember(*id));
        }
    }

    let passes_enumerated = variant == VARIANT_PASSES;
    Ok(members
        .iter()
        .map(|m| enumerated.contains(m) == passes_enumerated)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::test_blueprint_id;

    fn results(spec: &[(&str, bool)]) -> Vec<(BlueprintId, bool)> {
        spec.iter()
            .map(|(title, passed)| (test_blueprint_id(title), *passed))
            .collect()
    }

    #[test]
    fn all_pass_encodes_absent() {
        let r = results(&[("boot", true), ("ipc", true), ("ui", true)]);
        assert_eq!(encode(&r), None);
    }

    #[test]
    fn single_failure_enumerates_failures() {
        let r = results(&[("a", true), ("a2", true), ("a3", true), ("b", false)]);
        let spec = encode(&r).unwrap();
        assert_eq!(spec[0], VARIANT_FAILURES);
        assert_eq!(spec.len(), 1 + ID_BYTES);
        assert_eq!(&spec[1..], &test_blueprint_id("b").to_bytes());
    }

    #[test]
    fn majority_failure_enumerates_passes() {
        let r = results(&[("a", false), ("a2", false), ("a3", false), ("b", true)]);
        let spec = encode(&r).unwrap();
        assert_eq!(spec[0], VARIANT_PASSES);
        assert_eq!(&spec[1..], &test_blueprint_id("b").to_bytes());
    }

    #[test]
    fn tie_enumerates_failures() {
        let r = results(&[("a", true), ("b", false)]);
        let spec = encode(&r).unwrap();
        assert_eq!(spec[0], VARIANT_FAILURES);
        assert_eq!(spec.len(), 1 + ID_BYTES);
    }

    #[test]
    fn round_trip() {
        let r = results(&[("a", true), ("b", false), ("c", true), ("d", false)]);
        let members: Vec<BlueprintId> = r.iter().map(|(id, _)| *id).collect();
        let spec = encode(&r);
        let decoded = decode(spec.as_deref(), &members).unwrap();
        let expected: Vec<bool> = r.iter().map(|(_, passed)| *passed).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn round_trip_all_pass() {
        let r = results(&[("a", true), ("b", true)]);
        let members: Vec<BlueprintId> = r.iter().map(|(id, _)| *id).collect();
        let decoded = decode(encode(&r).as_deref(), &members).unwrap();
        assert_eq!(decoded, vec![true, true]);
    }

    #[test]
    fn duplicated_member_shares_outcome() {
        let a = test_blueprint_id("a");
        let b = test_blueprint_id("b");
        let r = vec![(a, false), (a, false), (b, true)];
        let members = vec![a, a, b];
        let decoded = decode(encode(&r).as_deref(), &members).unwrap();
        assert_eq!(decoded, vec![false, false, true]);
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let members = vec![test_blueprint_id("a")];
        let err = decode(Some(&[VARIANT_FAILURES, 0x01, 0x02]), &members).unwrap_err();
        assert_eq!(err, DecodeError::BadLength { len: 3 });

        let err = decode(Some(&[]), &members).unwrap_err();
        assert_eq!(err, DecodeError::BadLength { len: 0 });
    }

    #[test]
    fn unknown_variant_is_corrupt() {
        let a = test_blueprint_id("a");
        let mut payload = vec![0x07];
        payload.extend_from_slice(&a.to_bytes());
        let err = decode(Some(&payload), &[a]).unwrap_err();
        assert_eq!(err, DecodeError::BadVariant(0x07));
    }

    #[test]
    fn foreign_member_is_rejected() {
        let a = test_blueprint_id("a");
        let stranger = test_blueprint_id("not-a-member");
        let mut payload = vec![VARIANT_FAILURES];
        payload.extend_from_slice(&stranger.to_bytes());
        let err = decode(Some(&payload), &[a]).unwrap_err();
        assert_eq!(err, DecodeError::ForeignMember(stranger));
    }
}
