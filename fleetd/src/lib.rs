// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Fleet engine: moves project trees between the origin, compute, relay and
//! archive hosts and runs jobs on the compute host.

pub mod adapters;
pub mod app;
pub mod config;
pub mod logging;
