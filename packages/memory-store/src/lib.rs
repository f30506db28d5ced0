//! In-process document store for regrid.
//!
//! `MemoryDocumentStore` implements the full `DocumentStore` contract,
//! including store-side evaluation of conditional index keys. It backs the
//! demonstration CLI and the test suites.
//!
//! Enable the `test-utils` feature for `InstrumentedStore`, a wrapper that
//! counts calls and injects failures.

mod in_memory;

pub use in_memory::MemoryDocumentStore;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
