pub mod checksum;
pub mod engine;
pub mod render;
pub mod retry;
pub mod walker;

pub use checksum::{decode_checksum, encode_tags, md5_file, CHECKSUM_PREFIX};
pub use engine::{SyncEngine, SyncReport};
pub use render::{CsvRenderer, TreeRenderer};
pub use retry::RetryPolicy;
pub use walker::{FileRecord, WalkOptions, WalkVisitor, Walker};
