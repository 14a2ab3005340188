//! cmakit prelude.
//!
//! This module contains the most used types, traits and functions that you
//! can import easily as a group.
//!
//! ```
//! use cmakit::prelude::*;
//!
//! ```

#[doc(no_inline)]
pub use crate::error::MinimizerError;

#[doc(no_inline)]
pub use crate::minimize::{
    Bounds, CmaEs, CmaesOptions, CmaesResult, FallibleFn, MinimizerResult, ObjFn, Sigma,
    StopReason, Terminate, minimize,
};
