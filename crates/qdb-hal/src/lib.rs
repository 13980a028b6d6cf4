//! qdb Hardware Abstraction Layer.
//!
//! This crate defines the interface between the qdb pipeline and the backends
//! that actually run planned operations. A backend may be a deterministic
//! engine that answers each request with a single output, or a probabilistic
//! device whose outputs are samples that must be repeated and aggregated.
//!
//! # Overview
//!
//! - [`Backend`]: async trait every backend implements
//! - [`Capabilities`] / [`Features`]: what a backend can do (native
//!   batching, cooperative cancellation) and whether its outputs are samples
//! - [`OperationRequest`] / [`Param`]: a single backend invocation
//! - [`Counts`]: observed outcome distribution for repeated runs
//! - [`HalError`]: backend failures, split into retryable and fatal
//!
//! # Example
//!
//! ```ignore
//! use qdb_hal::{Backend, OperationRequest, Param};
//!
//! let request = OperationRequest::new("lookup").with_param("key", Param::Int(7));
//! let output = backend.run_once(&request).await?;
//! ```

pub mod backend;
pub mod error;
pub mod request;
pub mod result;

pub use backend::{Backend, Capabilities, Features};
pub use error::{HalError, HalResult};
pub use request::{OperationRequest, Param};
pub use result::Counts;
