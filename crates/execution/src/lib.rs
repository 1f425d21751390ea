//! Execution layer - templates, dependency resolution, scheduling and the
//! orchestrator that ties them together.

#![warn(missing_docs)]

pub mod template;
pub mod dependency;
pub mod scheduler;
pub mod notify;
pub mod engine;
pub mod config;
pub mod orchestrator;

// Templates
pub use template::{build_steps, StepBlueprint, TaskTemplate, TemplateRegistry};

// Scheduling
pub use dependency::{DependencyResolver, Resolution};
pub use scheduler::{Budget, RunningTask, TaskQueue};
pub use engine::{EngineConfig, ExecutionEngine, RunOutcome, SharedTask};

// Notifications
pub use notify::{ChannelObserver, FnObserver, NotificationBus, ObserverRef, TaskObserver};

// Facade
pub use config::{ConfigError, OrchestratorConfig, OrchestratorFileConfig};
pub use orchestrator::{Orchestrator, QueueStatus};
