//! Shared test fixtures for the attest workspace.
//!
//! Provides a single PostgreSQL testcontainer per test process. Tests that
//! need isolation (one tenant database, several client databases) carve
//! fresh databases out of it with [`PostgresFixture::create_database`].
//!
//! The fixture is lazily initialized and cleaned up when the process exits.
//! When Docker is not available every accessor returns `None` so tests can
//! skip instead of failing.

mod fixtures;

pub use fixtures::*;
