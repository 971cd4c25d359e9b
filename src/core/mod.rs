pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, UmiError};
pub use types::{Column, DataType, Record, Schema};
pub use value::Value;
