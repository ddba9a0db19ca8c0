//! # Logging
//!
//! Structured logging through `tracing`. Each layer records what it is
//! doing with typed fields rather than formatted strings:
//!
//! - **Unit of work**: `enter`, `commit` and `rollback` open spans carrying
//!   `read_only`; failures are logged with the error before rollback.
//! - **Manager**: one span per `load` (entry count, intent) and `save`; one
//!   event per loaded entry with its `aggregate_type` and `count`.
//! - **Repositories**: spans per load with `aggregate_type` and `lock`, and
//!   per-type `created`/`updated`/`deleted` counts on save.
//!
//! ## Levels
//!
//! ```bash
//! # Lifecycle only: entered, committed, rolled back
//! RUST_LOG=info cargo run
//!
//! # Every entry load, snapshot and per-type write
//! RUST_LOG=debug cargo run
//!
//! # Only the change tracking
//! RUST_LOG=shop_uow::container=debug cargo run
//! ```
//!
//! With `RUST_LOG=info` a committed purchase reads:
//!
//! ```text
//! INFO enter{read_only=false}: unit of work entered
//! INFO commit{read_only=false}:save{read_only=false}: changes saved types=1
//! INFO commit{read_only=false}: unit of work committed types=1
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Call once, at the start of `main`. Tests leave logging off.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
