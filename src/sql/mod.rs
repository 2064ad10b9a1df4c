//! Statement model and the PostgreSQL renderer: identifiers from descriptors
//! only, values as parameters.

mod builder;
pub mod params;
pub mod statement;

pub use builder::*;
pub(crate) use builder::{qualified_table, quoted};
pub use params::*;
pub use statement::*;
