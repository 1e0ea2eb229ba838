//! Seeds application configuration into the coordination and secrets stores.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod flatten;
mod loader;

pub use error::{Error, Result};
pub use flatten::{DEFAULT_SEGMENT, KeyValueDocument, Target, flatten};
pub use loader::{KvWriter, LoadTarget, load};
