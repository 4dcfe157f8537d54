//! SeaORM entity models for the archive store.

pub mod archived_message;
pub mod deletion_stat;
pub mod fetch_account;
pub mod fetch_cursor;
pub mod setting;
pub mod system_log;
