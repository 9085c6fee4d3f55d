//! A single row of a `.cat` index (part of the data model in spec §3).

/// The well-known MD5 of the empty string. Certain shipped catalogs record
/// this value for nonempty payloads (the "empty-hash bug", §4.1/§7).
pub const EMPTY_HASH_HEX: &str = "d41d8cd98f00b204e9800998ecf8427e";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Virtual path as it appeared in the `.cat` line (not yet normalised).
    pub path: String,
    pub length: u64,
    pub timestamp: i64,
    /// 16-byte MD5, kept raw; `md5_hex()` renders the text form used on disk.
    pub md5: [u8; 16],
}

impl CatalogEntry {
    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    pub fn is_empty_hash(&self) -> bool {
        self.md5_hex() == EMPTY_HASH_HEX
    }
}
