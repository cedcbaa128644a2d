pub mod cancel;
pub mod lazy;
pub mod sequence;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
