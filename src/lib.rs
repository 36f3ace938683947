//! Cut-based selection over grouped columnar jet datasets, with chunked
//! batched reading across many containers and chunked writing.
//!
//! ```text
//!  cuts    "pt > 20e3", "eventNumber % 2 == 0" → row masks
//!  labels  flavour catalog, each flavour a set of cuts
//!  data    containers, virtual views, Reader → NamedBatch → Writer
//!  mock    deterministic jets/tracks containers
//! ```

pub mod cuts;
pub mod data;
pub mod error;
pub mod labels;
pub mod mock;

pub use error::{Error, Result};
