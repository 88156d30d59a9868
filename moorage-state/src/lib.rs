//! Moorage State Management
//!
//! Persists resource records between runs so that declarations can be
//! diffed against what was created before.
//!
//! # Overview
//!
//! - **StateFile**: Serial-numbered collection of managed resources
//! - **StateBackend**: Storage trait with read/write and an advisory lock
//! - **LockInfo**: Who holds the state lock, and until when
//!
//! # Example
//!
//! ```ignore
//! use moorage_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::local("moorage.state.json"))?;
//!
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//!
//! // ... apply effects, then sync records into `state` ...
//!
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
