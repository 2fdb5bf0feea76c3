//! rota-core library.
//!
//! Tracks which catalog items have been posted per category, resets a
//! category once everything in it has gone out, and mirrors that state
//! between a local JSON file and a remote document.
//!
//! # Conventions
//!
//! - **Errors**: one `thiserror` enum per module, each mapping to a stable
//!   [`error::ErrorCode`].
//! - **Logging**: `tracing` macros; the binary owns the subscriber.

pub mod catalog;
pub mod category;
pub mod compare;
pub mod config;
pub mod error;
pub mod remote;
pub mod repository;
pub mod schema;
pub mod selector;
pub mod snapshot;
pub mod sync;
pub mod validate;

pub use catalog::{Catalog, CatalogDir, CatalogItem, CatalogSource};
pub use category::Category;
pub use compare::{ComparisonResult, MergeSummary, compare, merge};
pub use config::{RotaConfig, load_config};
pub use error::{ErrorCode, RemoteError};
pub use repository::{RepositoryError, SaveOutcome, StateRepository};
pub use selector::{available_items, mark_as_posted, random_available_item, stats};
pub use snapshot::Snapshot;
pub use sync::{SyncError, SyncMode, SyncOptions, SyncOrchestrator, SyncOutcome, SyncStatus};
pub use validate::{ValidationReport, Validator, validate_repository};
