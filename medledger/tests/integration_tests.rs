//! Integration tests entrypoint for the audit ledger

#[path = "support/mod.rs"]
mod support;

#[path = "integration/tamper_detection_test.rs"]
mod tamper_detection_test;

#[path = "integration/outbox_recovery_test.rs"]
mod outbox_recovery_test;

// Tests are defined inside the modules; this harness ensures they are built
// and executed when running `cargo test`.
