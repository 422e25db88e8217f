pub(crate) mod bitvector;
pub(crate) mod fixpoint;
pub(crate) mod interval;
