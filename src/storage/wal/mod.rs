pub mod logger;
pub use logger::Logger;

pub mod record;
pub use record::{InsertRecord, UpdateRecord, INSERT_RECORD, UPDATE_RECORD};
