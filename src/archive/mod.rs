mod archive;

pub use archive::{extract_zip, ArchiveError, ArchiveSource, HttpArchiveSource};
