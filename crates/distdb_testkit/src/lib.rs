//! # DistDB Testkit
//!
//! Test utilities for DistDB.
//!
//! This crate provides:
//! - Temp-directory fixtures that open managers and stores
//! - Property-based test generators using proptest
//! - An observer that records every notification it receives
//! - An in-process communicator for exercising the transport boundary
//! - Crash and damage simulation for recovery tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use distdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     let env = TestEnv::new();
//!     let store = env.open_native("notes");
//!     store.put(Partition::Native, b"k", b"v").unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod loopback;
pub mod recorder;

use std::sync::Once;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::loopback::*;
    pub use crate::recorder::*;
    pub use distdb_core::{
        CipherPassword, CoreError, DbStatus, Entry, KeyFilter, ObserverMode, Partition,
        StoreConfig,
    };
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use loopback::*;
pub use recorder::*;

static TRACING: Once = Once::new();

/// Installs a test-writer `tracing` subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
