//! Keyserver: fingerprint-indexed key bundles with signed reverse mappings
//! and name aliases.

pub mod bundle;
pub mod keyserver;
pub mod reverse;

pub use bundle::KeyBundle;
pub use keyserver::Keyserver;
pub use reverse::ReverseRecord;
