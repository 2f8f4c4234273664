//! # Replica Testkit
//!
//! Testing utilities for Replica.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Stores seeded with nodes, a pair and an entity catalog
//! - **Reference dataset**: The fetch paging scenario with known record sizes
//! - **Generators**: Proptest strategies for field values and records
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use replica_testkit::fixtures::{TestFixture, HUB_NODE, SPOKE_NODE};
//!
//! async fn example() -> replica_store::Result<()> {
//!     let hub = TestFixture::new(HUB_NODE, SPOKE_NODE).await?;
//!     hub.put_contact("c1", "Smith", 6).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use replica_testkit::generators::contact;
//!
//! proptest! {
//!     #[test]
//!     fn contact_hash_is_stable(record in contact()) {
//!         let a = replica_core::EncodedRecord::from_record(&record).unwrap();
//!         let b = replica_core::EncodedRecord::from_record(&record).unwrap();
//!         prop_assert_eq!(a.hash, b.hash);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{fetch_scenario, FetchScenario, TestFixture};
