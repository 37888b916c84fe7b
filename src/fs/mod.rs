//! FileSystem abstraction so manifest and descriptor loading can be tested
//! without touching disk

mod mock;
mod real;
mod r#trait;

pub use mock::MockFileSystem;
pub use r#trait::{FileKind, FileSystem};
pub use real::RealFileSystem;
