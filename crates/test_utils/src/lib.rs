//! Shared scaffolding for the billing test suites
//!
//! `BillingHarness` wires every engine over one in-memory store and a
//! recording notifier. Builders and fixtures supply readings, bills, and
//! payments with the tariff's worked examples as defaults; the assertion
//! helpers check bill state, ledger drift, and the conservation law;
//! `generators` holds the proptest strategies for account histories.

pub mod fixtures;
pub mod builders;
pub mod harness;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use harness::*;
pub use assertions::*;
pub use generators::*;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

/// Installs a test-writer fmt subscriber once per process
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
