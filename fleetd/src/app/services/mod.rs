// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod layout;
pub mod pid_resolution;
pub mod random;
pub mod run_id;
pub mod shell;
