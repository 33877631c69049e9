//! On-disk trigram index: writer, memory-mapped reader, and merger.
//!
//! The sealed file layout, in order: magic prefix, root path list, file name
//! table, posting lists, name-offset table, posting-offset table, trailer.
//! The trailer records the start offset of each variable section plus the
//! posting-offset entry count, and ends with the magic suffix.

use std::env;
use std::path::PathBuf;

pub const MAGIC: &[u8; 16] = b"csearch index 1\n";
pub const TRAILER_MAGIC: &[u8; 16] = b"\ncsearch trailr\n";

/// Five section offsets + posting-offset entry count + magic suffix.
pub(crate) const TRAILER_LEN: usize = 5 * 4 + 4 + TRAILER_MAGIC.len();

/// Posting-offset record: 3-byte big-endian trigram, 4-byte list byte length,
/// 4-byte list offset, both little-endian.
pub(crate) const POST_ENTRY_LEN: usize = 11;

pub const DEFAULT_MAX_FILE_LEN: u64 = 1 << 30;
pub const DEFAULT_MAX_LINE_LEN: usize = 2000;
pub const DEFAULT_MAX_TEXT_TRIGRAMS: usize = 30_000;
pub const DEFAULT_MAX_INVALID_UTF8_RATIO: f64 = 0.1;

mod writer;
pub use writer::IndexWriter;

pub(crate) mod writer_utils;

mod reader;
pub use reader::{DumpOptions, IndexReader};

mod merge;
pub use merge::merge;

mod utils;
pub(crate) use utils::{intersect_sorted, union_sorted};

/// Location of the index file: `$CSEARCHINDEX`, else `$HOME/.csearchindex`.
pub fn index_file() -> PathBuf {
    match env::var_os("CSEARCHINDEX") {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => home_dir().join(".csearchindex"),
    }
}

pub fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_default()
}
