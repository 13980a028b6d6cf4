//! qdb local simulator backend.
//!
//! [`SimBackend`] implements [`qdb_hal::Backend`] in process. It runs in one of
//! two modes:
//!
//! - **exact**: every operation returns a fixed output (configured per
//!   operation, or derived from the request when not configured)
//! - **sampled**: every run draws one outcome from a weighted distribution
//!   using a seeded RNG, so repeated runs are reproducible
//!
//! The simulator can also inject latency and transient failures, and keeps a
//! history of the requests it served. Both are used heavily by the pipeline's
//! tests.
//!
//! # Example
//!
//! ```ignore
//! use qdb_adapter_sim::SimBackend;
//!
//! let backend = SimBackend::sampled("sampler", vec![("42".into(), 0.9), ("7".into(), 0.1)], 1)?;
//! let counts = backend.run_repeated(&OperationRequest::new("search"), 100).await?;
//! ```

mod backend;
mod error;
mod spec;

pub use backend::SimBackend;
pub use error::{SimError, SimResult};
pub use spec::{SimMode, SimSpec};
