//! Shared domain logic for the pharmacy point-of-sale backend
//!
//! Everything in this crate is free of I/O: unit conversion, purchase order
//! reconciliation, search patterns, artifact naming, quantity and date parsing.
//! The backend applies these rules inside its database transactions.

pub mod artifact;
pub mod error;
pub mod models;
pub mod quantity;
pub mod reconcile;
pub mod search;
pub mod stock;
pub mod types;
pub mod validation;

pub use artifact::*;
pub use error::*;
pub use models::*;
pub use quantity::*;
pub use reconcile::*;
pub use search::*;
pub use stock::*;
pub use types::*;
pub use validation::*;
