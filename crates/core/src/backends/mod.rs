//! Isolation backend implementations.
//!
//! Each backend is behind a feature flag:
//!
//! | Backend | Feature | Isolation mechanism |
//! |---------|---------|---------------------|
//! | SQLite | `sqlite` (default) | emulated policies: filtered views and `INSTEAD OF` triggers |
//! | PostgreSQL | `postgres` | native row-level security |

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
