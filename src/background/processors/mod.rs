pub mod artifacts;
pub mod executable;
pub mod scratch;
