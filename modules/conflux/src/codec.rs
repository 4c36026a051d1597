//! Snapshot encoding.

use serde_json::{Map, Value};

use crate::error::FluxResult;

/// Store states keyed by store name.
pub type SnapshotMap = Map<String, Value>;

/// Turns snapshot maps into persisted strings and back.
pub trait StateCodec {
    fn name(&self) -> &'static str;
    fn serialize(&self, snapshot: &SnapshotMap) -> FluxResult<String>;
    fn deserialize(&self, raw: &str) -> FluxResult<SnapshotMap>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl StateCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, snapshot: &SnapshotMap) -> FluxResult<String> {
        Ok(serde_json::to_string(snapshot)?)
    }

    fn deserialize(&self, raw: &str) -> FluxResult<SnapshotMap> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FluxError;
    use serde_json::json;

    #[test]
    fn json_codec_reads_what_it_writes() {
        let mut snapshot = SnapshotMap::new();
        snapshot.insert("LocationStore".into(), json!({ "city": "paris" }));

        let raw = JsonCodec.serialize(&snapshot).unwrap();
        assert_eq!(raw, r#"{"LocationStore":{"city":"paris"}}"#);
        assert_eq!(JsonCodec.deserialize(&raw).unwrap(), snapshot);
    }

    #[test]
    fn non_object_blob_is_a_codec_error() {
        let err = JsonCodec.deserialize("[1, 2]").unwrap_err();
        assert!(matches!(err, FluxError::Codec(_)));
    }
}
