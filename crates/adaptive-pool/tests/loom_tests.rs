//! Loom-based concurrency tests for the pool's ownership protocol.
//!
//! Run with: `cargo test -p adaptive-pool --features loom --test loom_tests --release`
//!
//! Loom exhaustively explores thread interleavings. The pool is modelled in
//! isolation (one slot of storage, one shared item) to keep the state space
//! small while exercising the exact flag protocol `AdaptivePool` uses.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use loom::sync::{Arc, Mutex};
use loom::thread;

struct Item {
    pooled: AtomicBool,
}

/// Single-slot model of `AdaptivePool` storage.
struct LoomPool {
    storage: Mutex<Vec<Arc<Item>>>,
    capacity: usize,
}

impl LoomPool {
    fn new(capacity: usize) -> Self {
        Self {
            storage: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Mirrors `AdaptivePool::put`: early flag check, then check-and-set under the lock.
    fn put(&self, item: Arc<Item>) -> bool {
        if item.pooled.load(Ordering::Acquire) {
            return false;
        }
        let mut storage = self.storage.lock().unwrap();
        if storage.len() < self.capacity {
            if item.pooled.swap(true, Ordering::AcqRel) {
                return false;
            }
            storage.push(item);
            return true;
        }
        false
    }

    /// Mirrors `AdaptivePool::take` (without the factory fallback).
    fn take(&self) -> Option<Arc<Item>> {
        let mut storage = self.storage.lock().unwrap();
        while let Some(item) = storage.pop() {
            if item.pooled.swap(false, Ordering::AcqRel) {
                return Some(item);
            }
        }
        None
    }
}

/// Two threads returning the same shared item: exactly one wins.
#[test]
fn loom_double_return_stores_once() {
    loom::model(|| {
        let pool = Arc::new(LoomPool::new(2));
        let item = Arc::new(Item {
            pooled: AtomicBool::new(false),
        });

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let item = Arc::clone(&item);
                thread::spawn(move || pool.put(item))
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(pool.storage.lock().unwrap().len(), 1);
    });
}

/// Two takers racing for one stored item: at most one receives it.
#[test]
fn loom_take_is_exclusive() {
    loom::model(|| {
        let pool = Arc::new(LoomPool::new(1));
        let item = Arc::new(Item {
            pooled: AtomicBool::new(false),
        });
        assert!(pool.put(Arc::clone(&item)));

        let holders = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let holders = Arc::clone(&holders);
                thread::spawn(move || {
                    if pool.take().is_some() {
                        holders.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(holders.load(Ordering::SeqCst), 1);
        assert!(!item.pooled.load(Ordering::SeqCst));
    });
}

/// A take racing a return never observes a half-published item.
#[test]
fn loom_take_and_return_interleave() {
    loom::model(|| {
        let pool = Arc::new(LoomPool::new(1));
        let item = Arc::new(Item {
            pooled: AtomicBool::new(false),
        });

        let returner = {
            let pool = Arc::clone(&pool);
            let item = Arc::clone(&item);
            thread::spawn(move || pool.put(item))
        };
        let taker = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.take())
        };

        let returned = returner.join().unwrap();
        let taken = taker.join().unwrap();
        assert!(returned);

        match taken {
            // Taken after the return: flag cleared, storage empty
            Some(_) => {
                assert!(!item.pooled.load(Ordering::SeqCst));
                assert!(pool.storage.lock().unwrap().is_empty());
            }
            // Taken before: item stays stored and flagged
            None => {
                assert!(item.pooled.load(Ordering::SeqCst));
                assert_eq!(pool.storage.lock().unwrap().len(), 1);
            }
        }
    });
}
