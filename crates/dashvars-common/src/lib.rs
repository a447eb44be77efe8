pub mod error;
pub mod option;
pub mod time;

pub use error::*;
pub use option::*;
pub use time::*;
