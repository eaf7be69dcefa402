//! CLI commands implementation

pub mod init;
pub mod runs;
pub mod status;
pub mod sync;

pub use init::*;
pub use runs::*;
pub use status::*;
pub use sync::*;
