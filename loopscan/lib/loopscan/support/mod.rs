pub mod diagnostic;
pub(crate) mod safe_math;
