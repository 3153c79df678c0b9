pub mod error;
pub use error::DriftError;

pub mod result;
pub use result::DriftResult;
