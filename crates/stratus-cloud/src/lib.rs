//! Stratus Cloud
//!
//! Provider-neutral resource management for Stratus: declared resources go
//! in, a dependency-ordered plan comes out, and the engine applies it
//! against a `CloudProvider` while recording what exists in a state file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Stratus CLI                     │
//! │            (stratus plan/up/down)                │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ResourceSet
//! ┌─────────────────▼───────────────────────────────┐
//! │                stratus-cloud                     │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │  Dependency  │  │    Engine    │             │
//! │  │    Graph     │──▶ plan / apply │             │
//! │  └──────────────┘  └──────┬───────┘             │
//! │  ┌──────────────┐         │                     │
//! │  │  State Mgmt  │◀────────┤                     │
//! │  └──────────────┘         │                     │
//! └───────────────────────────┼─────────────────────┘
//!                             │ trait CloudProvider
//!                     ┌───────▼───────┐
//!                     │ LocalProvider │
//!                     └───────────────┘
//! ```

pub mod action;
pub mod engine;
pub mod error;
pub mod graph;
pub mod local;
pub mod output;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use engine::Engine;
pub use error::{CloudError, Result};
pub use graph::DependencyGraph;
pub use local::{LocalProvider, Operation, ProviderCall};
pub use output::{OUTPUT_MARKER, OutputReference};
pub use provider::{CloudProvider, REPLACE_ON_ANY, ResourceConfig, ResourceSet};
pub use state::{GlobalState, ResourceState, ResourceStatus, StateLock, StateManager};
