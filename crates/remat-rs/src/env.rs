use std::env;
use std::sync::OnceLock;

use crate::search::SEARCH_LIMIT;

static REMAT_SEARCH_LIMIT: OnceLock<usize> = OnceLock::new();
static REMAT_SEED: OnceLock<Option<u64>> = OnceLock::new();

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}

/// Iteration bound for the search loop, `REMAT_SEARCH_LIMIT` overridable.
pub(crate) fn search_limit() -> usize {
    *REMAT_SEARCH_LIMIT.get_or_init(|| {
        env::var("REMAT_SEARCH_LIMIT")
            .ok()
            .and_then(|v| parse_usize(&v))
            .unwrap_or(SEARCH_LIMIT)
    })
}

/// Seed for candidate pruning, `REMAT_SEED` overridable.
pub(crate) fn seed() -> Option<u64> {
    *REMAT_SEED.get_or_init(|| {
        env::var("REMAT_SEED")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
    })
}
