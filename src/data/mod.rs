//! Local EPC index: schema, write side, read side and bulk ingestion.

pub mod db {
    pub use crate::db::*;
}

pub mod db_storage {
    pub use crate::db_storage::*;
}

pub mod loader {
    pub use crate::loader::*;
}

pub mod lookup {
    pub use crate::lookup::*;
}
