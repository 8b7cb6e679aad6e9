//! Wire shapes exchanged with the pilot driver.
//!
//! Plain serde data with builders and no behavior. `pilot` layers the
//! request contexts, pages and workers on top; this crate changes only when
//! the wire format does.

pub mod fetch;
pub mod options;
pub mod types;

pub use fetch::*;
pub use options::*;
pub use types::*;
