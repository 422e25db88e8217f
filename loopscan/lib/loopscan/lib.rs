extern crate petgraph;
extern crate static_assertions;

pub(crate) mod adt;
pub mod analysis;
pub mod context;
pub mod error;
pub mod fileformat;
pub mod ir;
pub mod support;

#[cfg(test)]
pub(crate) mod tests;
