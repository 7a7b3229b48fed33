//! FUSE backend: exposes the provider through macFUSE or libfuse.

mod backend;
mod filesystem;
pub mod inode;
mod options;

pub use backend::{FuseBackend, FuseMountHandle};
pub use filesystem::VduFs;
pub use inode::{InodeTable, ROOT_INODE};
pub use options::{DEFAULT_ATTR_TTL, FuseOptions};
