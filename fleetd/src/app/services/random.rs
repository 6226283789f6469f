// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use rand::Rng;

/// Lowercase latin letters, used to keep scratch file names unique.
pub fn token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..26);
            (b'a' + idx) as char
        })
        .collect()
}
