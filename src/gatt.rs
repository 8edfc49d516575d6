//! The GATT plumbing the ranging engine runs on: the attribute-database
//! seam, the client/bearer seam, an in-memory database, and test mocks.

pub mod att_database;
pub mod callbacks;
pub mod channel;
pub mod gatt_database;
pub mod ids;
pub mod mocks;
