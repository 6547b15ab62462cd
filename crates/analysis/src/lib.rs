// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! operf-analysis: log parser state machines and the canonical result
//! document.
//!
//! The two parsers ([`TGenParser`], [`TorCtlParser`]) turn raw measurement
//! logs into per-transfer / per-circuit records plus summary series;
//! [`Analysis`] wraps them and owns the JSON document that gets published.

pub mod doc;
pub mod filter;
pub mod reprocess;
pub mod source;
pub mod tgen;
pub mod torctl;

pub use doc::{Analysis, AnalysisDoc, AnalysisError, FilterSpec, NodeData};
pub use filter::Filtering;
pub use reprocess::{collect_logs, pair_logs, reprocess_pairs, LogPair};
pub use source::DataSource;
pub use tgen::{TGenData, TGenParser, TransferRecord, TransfersSummary};
pub use torctl::{CircuitRecord, StreamRecord, TorCtlParser, TorData};
