//! perm-storage: Role and permission storage
//!
//! This crate provides the storage abstraction for perm, including:
//! - `PermissionRepo` / `RoleRepo` traits, combined as `Store`
//! - In-memory implementation with snapshot-consistent reads
//! - PostgreSQL implementation for production
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                perm-storage                  │
//! ├─────────────────────────────────────────────┤
//! │  model.rs      - Actors, roles, permissions │
//! │  pattern.rs    - Resource pattern matching  │
//! │  traits.rs     - Store trait definitions    │
//! │  memory.rs     - In-memory implementation   │
//! │  postgres.rs   - PostgreSQL implementation  │
//! │  migrations.rs - Schema migrations          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod migrations;
pub mod model;
pub mod pattern;
pub mod postgres;
pub mod traits;

// Re-export commonly used types
pub use error::{ErrorKind, StorageError, StorageResult};
pub use memory::MemoryStore;
pub use migrations::AppliedMigration;
pub use model::{
    Actor, Group, HasPermissionQuery, ListResourcePatternsQuery, Permission, Role, RoleKey,
};
pub use pattern::ResourcePattern;
pub use postgres::{PostgresConfig, PostgresStore};
pub use sqlx::postgres::PgPool;
pub use traits::{PermissionRepo, RoleRepo, Store};
