//! An intraprocedural dataflow analyzer and optimizer for programs that
//! manipulate CAT boxes (heap-allocated integer cells reached only through
//! the CAT runtime calls).

pub mod commons;
pub mod middle_end;
