//! Marquee engine: identifies movie files and maintains a browsable symlink
//! hierarchy over them.
//!
//! The pipeline is scan, parse, resolve, plan, sync. Each stage is usable on
//! its own; [`pipeline::Engine`] wires them together for the common case.
//! The external metadata source is abstracted behind
//! [`provider::MetadataProvider`], so this crate contains no network code.

pub mod cache;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod provider;
pub mod resolver;
pub mod scan;
pub mod settings;
pub mod sync;

pub use cache::RecordCache;
pub use error::{EngineError, Result};
pub use parser::{NameParser, Stoplist};
pub use pipeline::{Engine, PipelineReport};
pub use planner::HierarchyPlanner;
pub use provider::{MetadataProvider, ProviderError};
pub use resolver::{Resolution, Resolver};
pub use scan::LibraryScanner;
pub use settings::{
    EngineSettings, PlannerSettings, RetryPolicy, ScoringSettings,
};
pub use sync::{SyncAction, SyncFailure, SyncReport, TreeSynchronizer};
