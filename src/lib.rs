//! Bounded CMA-ES minimizer.
//!
//! [`minimize`](crate::minimize::minimize) runs a complete optimization and
//! always returns a [`CmaesResult`](crate::minimize::CmaesResult);
//! [`CmaEs`](crate::minimize::CmaEs) exposes the same engine one generation at
//! a time, including an ask/tell interface for callers that evaluate
//! candidates themselves.
//!
//! ```
//! use cmakit::prelude::*;
//! use ndarray::{Array1, array};
//!
//! let bounds = Bounds::new(vec![(Some(-5.0), Some(5.0)); 3]).unwrap();
//! let result = minimize(
//!     |x: &Array1<f64>| x.iter().map(|v| (v - 1.0).powi(2)).sum::<f64>(),
//!     Some(bounds),
//!     CmaesOptions::new().with_sigma(1.0).with_seed(1),
//! );
//! assert!(result.success);
//! assert!(result.fmin < 1e-8);
//! ```
pub mod error;
pub mod minimize;
pub mod prelude;
