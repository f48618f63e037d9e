//! Re-export public algorithms.

pub mod communicator;
pub mod entity_codec;
pub mod exchange;
pub mod migration;
pub mod transfer;
pub mod wire;

pub use migration::{MigrationReport, migrate_mesh};
pub use transfer::{MigrationCallbacks, MigrationList, invert_lists, migrate};
