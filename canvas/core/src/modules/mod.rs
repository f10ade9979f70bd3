//! Visualization modules
//!
//! Everything between a [`VizPath`](crate::messages::VizPath) and pixels on a
//! mount point: retry policy, the shared cache, the single-flight loader, the
//! declarative compiler and the runtime contract.

pub mod cache;
pub mod compiler;
pub mod loader;
pub mod retry;
pub mod runtime;

pub use cache::{CacheStats, Generation, LoadState, ModuleCache, VisualizationRef};
pub use compiler::{
    ActiveRender, ChartKind, CompiledUnit, DataSource, ModuleCompiler, SceneCompiler, SceneSpec,
};
pub use loader::{FetchLedger, ModuleLoader};
pub use retry::RetryConfig;
pub use runtime::{MountId, MountPoint, RecordingRuntime, RenderRuntime, RuntimeCall, Size};
