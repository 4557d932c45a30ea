pub mod flakes;
pub mod retention;
pub mod schema;
pub mod store;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::digest::{BlueprintId, ID_BYTES};

/// Timestamps are stored as fixed-width RFC 3339 UTC with nanosecond
/// precision and a `Z` suffix, so string order equals time order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Member lists persist as the concatenated big-endian id bytes in canonical
/// order, mirroring the digest input.
pub(crate) fn members_to_blob(members: &[BlueprintId]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(members.len() * ID_BYTES);
    for id in members {
        blob.extend_from_slice(&id.to_bytes());
    }
    blob
}

pub(crate) fn members_from_blob(blob: &[u8]) -> Option<Vec<BlueprintId>> {
    if blob.len() % ID_BYTES != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(blob.len() / ID_BYTES);
    for chunk in blob.chunks_exact(ID_BYTES) {
        let mut raw = [0u8; ID_BYTES];
        raw.copy_from_slice(chunk);
        out.push(BlueprintId::from_bytes(raw));
    }
    Some(out)
}

/// Wraps a row-decoding failure so it can propagate through rusqlite's
/// mapping closures.
pub(crate) fn column_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}
