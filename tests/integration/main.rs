//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives the hub through its public
//! boundaries against mock adapters. All tests run on the host (x86_64)
//! with no radio or flash required.

mod mock;
mod provisioning_flow_tests;
mod scenario_tests;
mod transport_tests;
