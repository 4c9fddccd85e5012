// Domain-layer modules and shared errors/models
pub mod council_tax {
    pub use crate::council_tax::*;
}

pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod normalize {
    pub use crate::normalize::*;
}

pub mod errors {
    pub use crate::errors::*;
}
