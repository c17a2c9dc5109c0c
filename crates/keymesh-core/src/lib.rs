pub mod codec;
pub mod constants;
pub mod error;
pub mod names;
pub mod time;
pub mod types;

pub use constants::*;
pub use error::KeymeshError;
pub use types::*;
