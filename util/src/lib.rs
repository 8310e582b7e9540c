#![warn(rust_2018_idioms)]

mod error;
pub mod marshal;

pub use error::Error;
pub use marshal::{Marshal, MarshalSize, Unmarshal};

pub type Result<T> = std::result::Result<T, Error>;
