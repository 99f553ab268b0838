// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # akh-mine
//!
//! Parallel, time-budgeted mining of logical rules from a knowledge graph.
//!
//! Workers repeatedly sample random walks, lift them into rules, score the
//! rules against the graph, and keep the good ones in a shared dedup store.
//! An adaptive allocator steers each worker towards the rule types that
//! have been productive, and the store is snapshotted to disk on a schedule.
//!
//! ## Architecture
//!
//! - **Graph index** (`graph`): interned triples with O(1) neighbour and truth lookups
//! - **Path sampler** (`sample`): single-attempt random walks, cyclic or acyclic
//! - **Rules** (`rule`): tagged rule kinds, generalization, scoring, the line syntax
//! - **Dedup store** (`store`): sharded insert-if-absent set of accepted rules
//! - **Learn loop** (`learn`): the Dice allocator, batch barrier, workers, snapshots
//!
//! ## Library usage
//!
//! ```no_run
//! use akh_mine::config::MineConfig;
//! use akh_mine::learn::Learner;
//!
//! let mut config = MineConfig::new("data/train.txt", "out/rules");
//! config.learn.snapshots_secs = vec![10, 60];
//! let learner = Learner::from_config(config).unwrap();
//! let summary = learner.run().unwrap();
//! println!("{} rules in {} batches", summary.rules, summary.batches);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod learn;
pub mod rule;
pub mod sample;
pub mod store;
pub mod symbol;
