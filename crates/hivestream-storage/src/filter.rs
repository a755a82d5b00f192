//! Object Listing Filters
//!
//! Predicates over [`ObjectMeta`] used while scanning a prefix. Filters
//! compose with [`combine_filters`] (logical AND), and every pipeline in
//! this crate additionally applies [`not_virtual_folder`] so that the
//! placeholder blobs some stores create to fake directories never reach
//! a reader.
//!
//! ## Virtual folders
//!
//! A virtual folder is a zero-content marker blob holding the literal
//! text `placeholder` (11 bytes), named like a directory (`prefix/`).
//! Stores expose its content MD5 through the object's e_tag (quoted or
//! bare, any case). Because [`object_store::path::Path`] normalises
//! trailing slashes away, detection keys on the e_tag plus either the
//! raw trailing slash (when the store preserves it) or the exact
//! placeholder length.

use std::sync::Arc;

use object_store::ObjectMeta;

use hivestream_core::KeyValues;

/// Predicate over a listed object; `true` keeps the object.
pub type ObjectFilter = Arc<dyn Fn(&ObjectMeta) -> bool + Send + Sync>;

/// MD5 digest of the literal text `placeholder`.
pub const PLACEHOLDER_MD5: [u8; 16] = [
    0x6a, 0x99, 0xc5, 0x75, 0xab, 0x87, 0xf8, 0xc7, 0xd1, 0xed, 0x1e, 0x52, 0xe7, 0xe3, 0x49, 0xce,
];

const PLACEHOLDER_MD5_HEX: &str = "6a99c575ab87f8c7d1ed1e52e7e349ce";

/// Byte length of the literal text `placeholder`.
const PLACEHOLDER_LEN: usize = 11;

/// True iff `meta` is a virtual-folder placeholder blob.
pub fn is_virtual_folder(meta: &ObjectMeta) -> bool {
    let Some(tag) = &meta.e_tag else { return false };
    if !tag.trim_matches('"').eq_ignore_ascii_case(PLACEHOLDER_MD5_HEX) {
        return false;
    }
    meta.location.as_ref().ends_with('/') || meta.size == PLACEHOLDER_LEN
}

/// Filter keeping everything except virtual-folder placeholders.
pub fn not_virtual_folder() -> ObjectFilter {
    Arc::new(|meta| !is_virtual_folder(meta))
}

/// Filter keeping every object.
pub fn accept_all() -> ObjectFilter {
    Arc::new(|_| true)
}

/// AND-combine filters: an object is kept iff every filter keeps it.
pub fn combine_filters(filters: Vec<ObjectFilter>) -> ObjectFilter {
    Arc::new(move |meta| filters.iter().all(|f| f(meta)))
}

/// Filter keeping objects whose name contains every `k=v/` token of
/// `partition`; the scan-side counterpart of partitioned blob names.
pub fn partition_filter(partition: KeyValues) -> ObjectFilter {
    Arc::new(move |meta| partition.matches_name(meta.location.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::path::Path;

    fn meta(name: &str, e_tag: Option<&str>, size: usize) -> ObjectMeta {
        ObjectMeta {
            location: Path::from(name),
            last_modified: chrono::DateTime::<chrono::Utc>::MIN_UTC,
            size,
            e_tag: e_tag.map(|s| s.to_string()),
            version: None,
        }
    }

    #[test]
    fn test_placeholder_constant_matches_hex() {
        let rendered: String = PLACEHOLDER_MD5.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(rendered, PLACEHOLDER_MD5_HEX);
    }

    #[test]
    fn test_virtual_folder_detection() {
        // Normalised store path plus placeholder-sized content.
        assert!(is_virtual_folder(&meta(
            "some/prefix",
            Some(PLACEHOLDER_MD5_HEX),
            PLACEHOLDER_LEN
        )));
        // Quoted and upper-case e_tags still match.
        assert!(is_virtual_folder(&meta(
            "some/prefix",
            Some("\"6A99C575AB87F8C7D1ED1E52E7E349CE\""),
            PLACEHOLDER_LEN
        )));
        // Wrong content hash is a real blob no matter the name.
        assert!(!is_virtual_folder(&meta("some/prefix", Some("deadbeef"), PLACEHOLDER_LEN)));
        assert!(!is_virtual_folder(&meta("some/prefix", None, PLACEHOLDER_LEN)));
        // Placeholder hash but a different size cannot be the marker.
        assert!(!is_virtual_folder(&meta(
            "some/prefix",
            Some(PLACEHOLDER_MD5_HEX),
            1024
        )));
    }

    #[test]
    fn test_combine_filters() {
        let ends_json: ObjectFilter = Arc::new(|m| m.location.as_ref().ends_with(".json"));
        let has_a: ObjectFilter = Arc::new(|m| m.location.as_ref().contains('a'));
        let both = combine_filters(vec![ends_json, has_a]);

        assert!(both(&meta("a/file.json", None, 0)));
        assert!(!both(&meta("b/file.json", None, 0)));
        assert!(!both(&meta("a/file.gz", None, 0)));
    }

    #[test]
    fn test_partition_filter() {
        use hivestream_core::KeyValue;
        let f = partition_filter(KeyValues::from(vec![
            KeyValue::new("test1", "value1"),
            KeyValue::new("test2", "value2"),
        ]));
        assert!(f(&meta(
            "test2=value2/randomcrap/test1=value1/file.json.gz",
            None,
            0
        )));
        assert!(!f(&meta("test1=value1/file.json.gz", None, 0)));
    }
}
