//! # Realm Bootstrap
//!
//! Process startup for a multi-threaded game world server.
//!
//! ## Overview
//!
//! The main thread owns a [`BootstrapCoordinator`], which starts three
//! long-lived workers (dispatcher, scheduler, async tasks), hands an
//! [`InitializationPipeline`] to the dispatcher and blocks on a one-shot
//! [`handshake`](handshake::handshake) until the pipeline reports back. Once
//! the pipeline has succeeded the coordinator either serves the registered
//! network services or, if none could be bound, shuts the workers down in
//! dependency order.
//!
//! A failing mandatory stage is fatal: the error travels back through the
//! handshake and the binary escalates it with [`ErrorEscalation`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use realm_bootstrap::{standard_pipeline, BootstrapCoordinator, ConfigSource, ServerContext};
//!
//! let coordinator = BootstrapCoordinator::new();
//! let context = ServerContext::new(
//!     ConfigSource { path: "config.toml".into(), data_directory: None },
//!     coordinator.handles(),
//! );
//! let outcome = coordinator.run(standard_pipeline(), context, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! });
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod escalation;
pub mod handshake;
pub mod pipeline;
pub mod services;
pub mod startup;
pub mod worker;

pub use config::Config;
pub use context::{ConfigSource, GameState, ServerContext, World, WorkerHandles};
pub use coordinator::{BootstrapCoordinator, CoordinatorMonitor, Phase};
pub use error::{BootstrapError, FatalError, StageError, WorkerError, EXIT_FAILURE};
pub use escalation::ErrorEscalation;
pub use pipeline::{InitializationPipeline, PipelineReport, Stage};
pub use services::ServiceManager;
pub use startup::standard_pipeline;
