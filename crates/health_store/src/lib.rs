//! Storage for Pulselog users, bearer tokens and health readings.
//!
//! [`HealthStore`] is the single storage abstraction. [`MemoryHealthStore`]
//! backs tests and throwaway servers; [`SqliteHealthStore`] is the persistent
//! implementation. Every reading query is constrained by a
//! [`auth::ReadingScope`] supplied by the caller.

mod clock;
mod error;
mod memory;
pub mod queries;
mod sqlite;
mod traits;

pub use clock::*;
pub use error::*;
pub use memory::*;
pub use sqlite::*;
pub use traits::*;
