//! Syndicast - scheduled multi-platform publishing engine
//!
//! This library provides the core engine for scheduling social media
//! posts and publishing them across platforms: a durable delayed-job
//! queue, a guarded post lifecycle, OAuth token management with
//! encrypted storage, per-platform adapters behind one contract, and
//! signed webhook notifications on terminal outcomes.

pub mod backoff;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod notify;
pub mod platforms;
pub mod scheduler;
pub mod scheduling;
pub mod state;
pub mod tokens;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use config::Config;
pub use db::Database;
pub use error::{PlatformError, Result, SyndicastError};
pub use scheduler::PublishScheduler;
pub use state::PostStateMachine;
pub use tokens::TokenLifecycleManager;
pub use types::{Credentials, PlatformKind, Post, PostStatus, SocialAccount};
pub use vault::TokenVault;
