pub mod memory;
pub mod types;
