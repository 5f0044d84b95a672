//! Object key naming for offloaded ledgers.
//!
//! Keys are deterministic functions of `(ledger_id, uuid)` on the bulk path
//! and of the segment uuid alone on the streaming path. The index object key
//! is always the data key with a fixed `-index` suffix, and scans recover the
//! ledger id and uuid back from the key.

use uuid::Uuid;

const INDEX_SUFFIX: &str = "-index";
const LEDGER_INFIX: &str = "-ledger-";

/// Data object key for a bulk-offloaded ledger.
pub fn data_key(ledger_id: u64, uuid: Uuid) -> String {
    format!("{}{}{}", uuid, LEDGER_INFIX, ledger_id)
}

/// Data object key for a streaming segment.
pub fn segment_data_key(uuid: Uuid) -> String {
    uuid.to_string()
}

/// Index object key derived from a data key.
pub fn index_key(data_key: &str) -> String {
    format!("{}{}", data_key, INDEX_SUFFIX)
}

/// Whether a key names an index object.
pub fn is_index_key(key: &str) -> bool {
    key.ends_with(INDEX_SUFFIX)
}

/// Recover the ledger id from an object key, if it was bulk-offloaded.
pub fn parse_ledger_id(key: &str) -> Option<u64> {
    let key = key.strip_suffix(INDEX_SUFFIX).unwrap_or(key);
    let (_, id) = key.rsplit_once(LEDGER_INFIX)?;
    id.parse().ok()
}

/// Recover the offload uuid from an object key.
pub fn parse_uuid(key: &str) -> Option<String> {
    let key = key.strip_suffix(INDEX_SUFFIX).unwrap_or(key);
    let uuid = match key.split_once(LEDGER_INFIX) {
        Some((uuid, _)) => uuid,
        None => key,
    };
    Uuid::parse_str(uuid).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_keys_roundtrip() {
        let uuid = Uuid::new_v4();
        let data = data_key(42, uuid);
        let index = index_key(&data);

        assert!(index.ends_with("-index"));
        assert!(!is_index_key(&data));
        assert!(is_index_key(&index));

        assert_eq!(parse_ledger_id(&data), Some(42));
        assert_eq!(parse_ledger_id(&index), Some(42));
        assert_eq!(parse_uuid(&data), Some(uuid.to_string()));
        assert_eq!(parse_uuid(&index), Some(uuid.to_string()));
    }

    #[test]
    fn test_segment_keys() {
        let uuid = Uuid::new_v4();
        let data = segment_data_key(uuid);
        assert_eq!(parse_ledger_id(&data), None);
        assert_eq!(parse_uuid(&data), Some(uuid.to_string()));
        assert_eq!(parse_uuid(&index_key(&data)), Some(uuid.to_string()));
    }

    #[test]
    fn test_unparseable_key() {
        assert_eq!(parse_ledger_id("random-object"), None);
        assert_eq!(parse_uuid("random-object"), None);
    }
}
