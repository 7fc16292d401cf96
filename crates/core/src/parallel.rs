// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared parallel-map primitive.
//!
//! A thin wrapper over `rayon`'s work-stealing pool that isolates panics
//! per item: one item panicking turns into an `Error::Internal` for that
//! item instead of poisoning the whole batch.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;

use crate::error::{Error, Result};

/// Threshold above which callers should prefer the parallel path; below it
/// the rayon setup overhead isn't worth paying.
pub const PARALLEL_THRESHOLD: usize = 4;

/// Map `f` over `items`, sequentially when `items.len() <= PARALLEL_THRESHOLD`
/// and via rayon's work-stealing pool otherwise. A panic inside `f` for a
/// given item is caught and reported as `Error::Internal` for that item
/// alone; it does not abort the rest of the batch.
pub fn map<T, R, F>(items: &[T], f: F) -> Vec<Result<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    let guarded = |item: &T| -> Result<R> {
        match catch_unwind(AssertUnwindSafe(|| f(item))) {
            Ok(result) => result,
            Err(_) => Err(Error::Internal("worker panicked".to_string())),
        }
    };

    if items.len() > PARALLEL_THRESHOLD {
        items.par_iter().map(guarded).collect()
    } else {
        items.iter().map(guarded).collect()
    }
}

#[cfg(test)]
#[path = "parallel_tests.rs"]
mod tests;
