pub mod exchanger;
pub mod types;
