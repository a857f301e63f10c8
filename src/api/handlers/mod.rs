pub mod convert;
pub mod system;
