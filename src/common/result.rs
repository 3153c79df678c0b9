use super::error::DriftError;

pub type DriftResult<T> = std::result::Result<T, DriftError>;
