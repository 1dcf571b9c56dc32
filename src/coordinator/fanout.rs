//! Bounded parallel fan-out over directory listings.
//!
//! Enumerations materialize one domain object per directory entry; doing
//! that serially costs one coordinator round-trip per child. This helper
//! maps a fallible function over the items with a capped worker pool and
//! returns either every result (input order preserved) or the first error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam::channel;

/// Worker cap: enough to hide round-trip latency without stampeding the
/// coordinator.
pub const MAX_WORKERS: usize = 8;

/// Map `f` over `items` with at most [`MAX_WORKERS`] concurrent calls.
///
/// All-or-first-error: on success the results come back in input order; on
/// failure the error of the lowest-indexed failing item is returned.
pub fn fan_out<I, T, E, F>(items: &[I], f: F) -> Result<Vec<T>, E>
where
    I: Sync,
    T: Send,
    E: Send,
    F: Fn(&I) -> Result<T, E> + Sync,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let workers = MAX_WORKERS.min(items.len());
    let cursor = AtomicUsize::new(0);
    let (tx, rx) = channel::unbounded::<(usize, Result<T, E>)>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let cursor = &cursor;
            let f = &f;
            scope.spawn(move || loop {
                let idx = cursor.fetch_add(1, Ordering::Relaxed);
                if idx >= items.len() {
                    break;
                }
                if tx.send((idx, f(&items[idx]))).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<T>> = (0..items.len()).map(|_| None).collect();
        let mut first_err: Option<(usize, E)> = None;
        for (idx, result) in rx {
            match result {
                Ok(value) => slots[idx] = Some(value),
                Err(err) => {
                    if first_err.as_ref().map_or(true, |(i, _)| idx < *i) {
                        first_err = Some((idx, err));
                    }
                }
            }
        }
        match first_err {
            Some((_, err)) => Err(err),
            None => Ok(slots.into_iter().map(|s| s.expect("slot filled")).collect()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_input_order() {
        let items: Vec<usize> = (0..50).collect();
        let out = fan_out(&items, |i| Ok::<_, ()>(i * 2)).unwrap();
        assert_eq!(out, items.iter().map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn returns_first_error_by_index() {
        let items: Vec<usize> = (0..20).collect();
        let err = fan_out(&items, |i| {
            if *i >= 3 {
                Err(format!("boom {i}"))
            } else {
                Ok(*i)
            }
        })
        .unwrap_err();
        assert_eq!(err, "boom 3");
    }

    #[test]
    fn empty_input_is_empty_output() {
        let items: Vec<usize> = Vec::new();
        assert_eq!(fan_out(&items, |i| Ok::<_, ()>(*i)).unwrap(), Vec::<usize>::new());
    }
}
