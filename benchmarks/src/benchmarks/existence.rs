//! Existence check benchmarks
//!
//! One polling pass over the expected file set is what the waiter repeats
//! every interval; these measure its cost for growing set sizes.

use crate::{measure, CaseReport};
use secstage_core::ExpectedFileSet;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const ITERATIONS: u32 = 200;

pub fn run_all() -> Vec<CaseReport> {
    vec![
        bench_refresh_present(10),
        bench_refresh_present(1000),
        bench_refresh_absent(10),
        bench_refresh_absent(1000),
    ]
}

fn expected_paths(dir: &TempDir, count: usize, create: bool) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.path().join(format!("Assembly{}_Secure.dll", i));
            if create {
                fs::write(&path, b"MZ").unwrap();
            }
            path
        })
        .collect()
}

fn bench_refresh_present(count: usize) -> CaseReport {
    let temp_dir = TempDir::new().unwrap();
    let paths = expected_paths(&temp_dir, count, true);

    measure(format!("confirm {} present files", count), count, ITERATIONS, || {
        let mut set = ExpectedFileSet::new(paths.iter().cloned());
        set.refresh();
        assert!(set.is_complete());
        None
    })
}

fn bench_refresh_absent(count: usize) -> CaseReport {
    let temp_dir = TempDir::new().unwrap();
    let paths = expected_paths(&temp_dir, count, false);
    let mut set = ExpectedFileSet::new(paths);

    measure(format!("check {} absent files", count), count, ITERATIONS, || {
        std::hint::black_box(set.refresh());
        None
    })
}
