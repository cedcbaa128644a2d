pub mod actions;
pub mod lifecycle;
pub mod transformer;
pub mod types;
