// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2019 Joyent, Inc.
// Copyright 2026 Edgecast Cloud LLC.

/// This module provides helper functions that generate pseudorandom output.
pub mod random {
    use quickcheck::{Arbitrary, Gen};

    /// Generate a random [`String`] of size `len` containing only lowercase
    /// alphanumeric characters (a-z, 0-9) using the provided generator `g`.
    pub fn string(g: &mut Gen, len: usize) -> String {
        (0..len)
            .map(|_| {
                let c = u8::arbitrary(g);
                match c % 36 {
                    n @ 0..=25 => (b'a' + n) as char,
                    n => (b'0' + (n - 26)) as char,
                }
            })
            .collect()
    }

    /// Generate a non-empty length no larger than `max`.
    pub fn len(g: &mut Gen, max: u8) -> usize {
        (u8::arbitrary(g) % max.max(1)) as usize + 1
    }

    /// Generate a dotted host name such as `3.db.k2x9`.
    pub fn hostname(g: &mut Gen) -> String {
        let n = len(g, 32);
        let (a, b) = (len(g, 12), len(g, 12));
        format!("{}.{}.{}", n, string(g, a), string(g, b))
    }

    /// Generate a table prefix such as `status_0042`.
    pub fn table_prefix(g: &mut Gen) -> String {
        let n = len(g, 16);
        let table = string(g, n);
        format!("{}_{:04}", table, u16::arbitrary(g) % 10_000)
    }
}
