pub mod diff;
pub mod timeline;
pub mod version;

pub use diff::*;
pub use timeline::*;
pub use version::*;
