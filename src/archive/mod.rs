//! Reading uploaded archives and writing export bundles.

pub mod bundle;
pub mod extract;

pub use bundle::{pack, BundleEntry};
pub use extract::{extract_stream, ArchiveEntry};
