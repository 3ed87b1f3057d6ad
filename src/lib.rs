// THEORY:
// This file is the main entry point for the `composite_synth` library crate.
// It defines the public API used by the dataset builder in `main.rs` and by any
// other consumer that wants to synthesize detection data.
//
// The high-level interface is the `pipeline::Synthesizer` (one synthetic frame per
// call) and the `parallel_pipeline::SweepPool` (rotation sweeps spread over worker
// tasks). The building blocks they are made of (masks, boxes, objects, labels,
// guards) live in `core_modules` and are public as well, because the label format
// and the box conventions are useful on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use error::{GeometryError, Result, StateError, SynthError, ValidationError};
