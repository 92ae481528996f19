//! In-memory model of the `class` file format, along with reading and writing it

mod attribute;
mod class;
mod constants;
mod field;
mod method;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
