// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace end-to-end scenarios: raw logs through the parsers into a
//! published document, and the nightly rotation pipeline.

#[path = "specs/fixtures.rs"]
mod fixtures;
#[path = "specs/pipeline.rs"]
mod pipeline;
#[path = "specs/rotation.rs"]
mod rotation;
