//! CTG-Core: Foundation types for cardiotocography sessions
//!
//! Session descriptors, channel series, prepared sessions and the shared error type.

pub mod error;
pub mod session;
pub mod series;
pub mod prepared;

pub use session::*;
pub use series::*;
pub use prepared::*;
pub use error::{CtgError, CtgResult};
