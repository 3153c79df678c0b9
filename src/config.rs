//! This file provide some configuration for driftdb
//! Caution: if you changed anyone below, make sure you have deleted
//! old database files before starting driftdb, or it may cause some
//! unexpected errors.

pub const _NAME: &str = "driftdb";
pub const _VERSION: &str = "0.1.0";

pub const LOG_LEVEL: &str = "info";
pub const LOG_PATH: &str = "./logs/driftdb.log";

pub const DEFAULT_DATA_DIR: &str = "./data";

pub const PAGE_SIZE_BYTES: usize = 4 * 1024; // 4 KB

/// Fixed file names inside the data directory.
pub const DB_FILE: &str = ".db";
pub const WAL_FILE: &str = ".log";
pub const XID_FILE: &str = ".xid";
