// Correctness and logic
#![warn(clippy::unit_cmp)] // Detects comparing unit types
#![warn(clippy::match_same_arms)]
// Duplicate match arms

// Performance-focused
#![warn(clippy::inefficient_to_string)] // `format!("{}", x)` vs `x.to_string()`
#![warn(clippy::map_clone)] // Cloning inside `map()` unnecessarily
#![warn(clippy::unnecessary_to_owned)] // Detects redundant `.to_owned()` or `.clone()`
#![warn(clippy::large_stack_arrays)] // Helps avoid stack overflows
#![warn(clippy::box_collection)] // Warns on boxed `Vec`, `String`, etc.
#![warn(clippy::vec_box)] // Avoids using `Vec<Box<T>>` when unnecessary
#![warn(clippy::needless_collect)] // Avoids `.collect().iter()` chains

// Style and idiomatic Rust
#![warn(clippy::redundant_clone)] // Detects unnecessary `.clone()`
#![warn(clippy::identity_op)] // e.g., `x + 0`, `x * 1`
#![warn(clippy::needless_return)] // Avoids `return` at the end of functions
#![warn(clippy::let_unit_value)] // Avoids binding `()` to variables
#![warn(clippy::manual_map)] // Use `.map()` instead of manual `match`
#![warn(clippy::unwrap_used)] // Avoids using `unwrap()`

// Maintainability
#![warn(clippy::missing_panics_doc)] // Docs for functions that might panic
#![warn(clippy::missing_safety_doc)] // Docs for `unsafe` functions
#![warn(clippy::missing_const_for_fn)] // Suggests making eligible functions `const`
#![allow(clippy::too_many_arguments)]
// Allow functions with many parameters (very few and far between)
#![deny(missing_docs)] // Documentation is a must for release

//! # SparseAuxIVA
//!
//! Blind separation of determined convolutive mixtures in the short-time
//! frequency domain, using auxiliary-function independent vector analysis
//! (AuxIVA) on a subset of frequency bins and sparse relative-transfer-function
//! reconstruction for the rest.
//!
//! ## Overview
//!
//! Running AuxIVA on every bin is the expensive part of frequency-domain
//! separation. This crate runs the iterative solver only on a *support* of
//! bins (for example the most energetic 80%), then, for two microphones,
//! recovers a short time-domain relative impulse response per source from the
//! support bins and evaluates it everywhere. A final projection back fixes
//! the per-bin scale ambiguity.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sparse_auxiva = "0.1.0"
//! ```
//!
//! ## Features
//!
//! - `random-generation` (default): seeded synthetic mixtures (using `rand` crate)
//! - `parallel-processing`: per-bin solver updates on the rayon thread pool
//! - `serialization`: serde support for the configuration types
//!
//! ## Error Handling
//!
//! Every fallible operation returns a [`SeparationResult`]. Shape and
//! parameter errors are reported before any iteration starts:
//!
//! ```rust
//! use sparse_auxiva::{SeparationError, SeparationResult};
//!
//! let result: SeparationResult<()> = Err(SeparationError::invalid_parameter(
//!     "epochs",
//!     "must be > 0",
//! ));
//!
//! match result {
//!     Ok(()) => {}
//!     Err(SeparationError::SingularMatrix { bin, column }) => {
//!         eprintln!("singular system at bin {bin}, source {column}")
//!     }
//!     Err(other) => eprintln!("separation failed: {other}"),
//! }
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use sparse_auxiva::{ConvolutiveMixture, FrequencySupport, SparseAuxIva};
//!
//! // 200 frames, 33 bins, two sources and two microphones
//! let mixture = ConvolutiveMixture::two_by_two(200, 33, 7)?;
//! let x = mixture.observation.view();
//!
//! let support = FrequencySupport::from_energy(x, 0.8)?;
//! let separation = SparseAuxIva::new().epochs(30).separate(x, &support)?;
//!
//! assert_eq!(separation.signals.dim(), (200, 33, 2));
//! # Ok::<(), sparse_auxiva::SeparationError>(())
//! ```
//!
//! The one-call form mirrors the classic interface:
//!
//! ```rust
//! use sparse_auxiva::{ConvolutiveMixture, sparse_auxiva};
//!
//! let mixture = ConvolutiveMixture::two_by_two(100, 17, 1)?;
//! let support: Vec<usize> = (0..17).filter(|f| f % 3 != 0).collect();
//! let separation = sparse_auxiva(mixture.observation.view(), &support, 10, true, true, true)?;
//! assert!(separation.filters.is_some());
//! # Ok::<(), sparse_auxiva::SeparationError>(())
//! ```

mod error;

pub mod contrast;
pub mod demix;
pub mod linalg;
pub mod recovery;
pub mod separation;
pub mod support;
pub mod utils;

pub use crate::contrast::Contrast;
pub use crate::demix::{Demix, MixingOperator, demix};
pub use crate::error::{SeparationError, SeparationResult};
pub use crate::recovery::{PartialFourier, SparseRecovery, WeightedLasso};
pub use crate::separation::{
    AuxIvaSolver, AuxIvaState, EpochStats, ProjectionBack, RtfEstimate, RtfReconstructor,
    Separation, SeparationReport, SingularPolicy, SparseAuxIva, projection_back, sparse_auxiva,
};
pub use crate::support::FrequencySupport;
pub use crate::utils::comparison::{SourceMatch, correlation, match_sources, mse, sdr};
pub use crate::utils::generation::{ConvolutiveMixture, sparse_filter_response};

#[cfg(feature = "random-generation")]
pub use crate::utils::generation::random_sources;

pub use num_complex::Complex64;
