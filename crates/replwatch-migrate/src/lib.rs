//! replwatch-migrate — coordinated SQL migrations across databases.
//!
//! ```text
//! MigrationExecutor::start / execute
//!   ├── check      script, targets, order → Preflight (statements, warnings)
//!   ├── lease      every target or none; overlap → Conflict naming the database
//!   ├── persist    MigrationExecution { status: running }
//!   └── run        for each target in order:
//!                    cancelled or halted → skipped
//!                    execute_in_transaction → success | failed (rolled back)
//! ```
//!
//! Dry runs stop after the check and are stored as completed records with
//! `validated` results. Omitting the targets selects every configured
//! database.

pub mod error;
pub mod executor;
pub mod lease;
pub mod split;

pub use error::{MigrateResult, MigrationError};
pub use executor::{MigrationExecutor, MigrationRequest, MigrationsConfig};
pub use lease::{LeaseGuard, LeaseTable};
pub use split::{Statement, preflight_warnings, split_statements};
