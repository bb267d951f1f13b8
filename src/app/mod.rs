//! Process entry points for the two roles

pub mod directory;
pub mod peer;

pub use directory::run_directory;
pub use peer::run_peer;
