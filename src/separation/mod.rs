//! Sparse AuxIVA separation.
//!
//! - [`auxiva`] - the iterative solver over a frequency support
//! - [`rtf`] - two-channel full-band reconstruction from sparse RTFs
//! - [`projection`] - scale normalization by projection back
//! - [`pipeline`] - the end-to-end entry points
//! - [`types`] - policies, reports and results

pub mod auxiva;
pub mod pipeline;
pub mod projection;
pub mod rtf;
pub mod types;

pub use auxiva::{AuxIvaSolver, AuxIvaState, EpochStats};
pub use pipeline::{SparseAuxIva, sparse_auxiva};
pub use projection::{ProjectionBack, projection_back};
pub use rtf::{RtfEstimate, RtfReconstructor};
pub use types::{Separation, SeparationReport, SingularPolicy};
