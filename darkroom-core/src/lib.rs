/*! This library implements the darkroom editing core on top of the
 *  hardware abstraction layer: the startup backend decider, the tonal
 *  operations with their fused and sequential forms, the pipeline
 *  builder/executors, and the state manager that owns the edit list and
 *  publishes working images to lock-free readers.
 *
 *  The intended entry sequence is [`init`] (once, from one thread) and
 *  then a [`StateManager`] per loaded image. Everything `init` decides
 *  (memory location, GPU family, device context) is immutable for the
 *  rest of the process.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(trivial_casts, unused_extern_crates, unused_qualifications)]

pub mod config;
pub mod conv;
pub mod decider;
pub mod error;
pub mod ops;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod state;
pub mod task;

pub use config::{init, BackendSelection};
pub use error::{InitError, PipelineError, UpdateError};
pub use pipeline::{build_pipeline, PipelineExecutor};
pub use registry::{builtin_registry, register_working_images, OperationRegistry};
pub use source::{SourceError, SourceProvider};
pub use state::{StateManager, StateSnapshot, UpdateCallback, UpdateHandle};
pub use task::ProcessingTask;

/// Fast hash map used internally.
type FastHashMap<K, V> =
    std::collections::HashMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
