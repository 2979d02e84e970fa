//! Strata aggregate crate that re-exports the main components for downstream users.

pub use strata_book as book;
pub use strata_config as config;
pub use strata_core as core;
pub use strata_sim as sim;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use strata_book::*;
    pub use strata_config::*;
    pub use strata_core::*;
    pub use strata_sim::*;
}
