//! Praetor-Sandbox: Ghost Container Pool
//!
//! Warm, single-tenant, disposable sandboxes for reversible speculative
//! execution. Containers are leased from an idle queue, labelled with the
//! leasing tenant, and scrubbed before they are offered again; a failed
//! scrub destroys the container.
//!
//! The runtime itself is pluggable through [`PoolBackend`]: production
//! deployments run a gVisor-equivalent with a read-only root, no network,
//! CPU and memory quotas and a tmpfs `/tmp`; development and tests use the
//! in-memory [`EphemeralBackend`].
//!
//! # Example
//!
//! ```rust,ignore
//! use praetor_sandbox::{EphemeralBackend, GhostPool, PoolConfig};
//!
//! let pool = GhostPool::new(Arc::new(EphemeralBackend::new()), PoolConfig::default());
//! pool.start_maintainer();
//! let container = pool.get("tenant-a", Duration::from_secs(5)).await?;
//! let output = pool.execute_speculative(&container, &["read_database"], payload).await?;
//! pool.put(container);
//! ```

pub mod backend;
pub mod pool;

// Re-exports
pub use backend::{EphemeralBackend, ExecOutput, PoolBackend, PoolError};
pub use pool::{GhostContainer, GhostPool, PoolConfig};
