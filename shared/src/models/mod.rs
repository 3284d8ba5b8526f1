//! Domain models shared by the stock engine and the document stores

mod document;
mod medicine;

pub use document::*;
pub use medicine::*;
