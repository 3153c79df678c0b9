pub mod xid_store;
pub use xid_store::{XidStore, SUPER_XID};

pub mod transaction;
pub use transaction::{IsolationLevel, Transaction};
