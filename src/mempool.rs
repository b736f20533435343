//! Fixed-cell pools.
//!
//! A `Datastore` owns every cell of one kind (requests, contexts,
//! reply buffers), all allocated at creation. A `Pool` is a view a
//! single thread attaches to it: with `Scope::PerCpu` the pool keeps a
//! local magazine and only touches the datastore to move whole chunks,
//! with `Scope::Global` every call goes to the datastore under its
//! lock. Either way `alloc` is O(1), never blocks (the chunk transfer
//! uses `try_lock`), and returns `None` on exhaustion, and the caller
//! drops the work item and moves on.
//!
//! Nothing here allocates after `Datastore::new` returns; the hot path
//! shuffles preallocated boxes between vectors.

use std::sync::{Arc, Mutex};

use crate::error::InitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Pool shares the datastore with other pools; every call locks.
    Global,
    /// Pool refills a private magazine a chunk at a time.
    PerCpu,
}

/// Backing store of preallocated cells.
pub struct Datastore<T> {
    name: &'static str,
    chunk: usize,
    capacity: usize,
    cells: Mutex<Vec<Box<T>>>,
}

impl<T> Datastore<T> {
    /// Allocate `capacity` cells up front, each initialized by `mk`.
    /// `chunk` is the transfer unit between datastore and per-CPU
    /// magazines.
    pub fn new(
        name: &'static str,
        capacity: usize,
        chunk: usize,
        mut mk: impl FnMut() -> T,
    ) -> Arc<Datastore<T>> {
        let cells = (0..capacity).map(|_| Box::new(mk())).collect();
        Arc::new(Datastore {
            name,
            chunk: chunk.max(1),
            capacity,
            cells: Mutex::new(cells),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A single thread's handle on a datastore.
pub struct Pool<T> {
    store: Arc<Datastore<T>>,
    scope: Scope,
    magazine: Vec<Box<T>>,
}

impl<T> Pool<T> {
    pub fn attach(store: &Arc<Datastore<T>>, scope: Scope) -> Pool<T> {
        let magazine = match scope {
            Scope::Global => Vec::new(),
            Scope::PerCpu => Vec::with_capacity(2 * store.chunk),
        };
        Pool {
            store: Arc::clone(store),
            scope,
            magazine,
        }
    }

    /// Pull `n` cells into the magazine now, so the first `n` allocs
    /// cannot miss. Bring-up only; fails if the datastore can't cover
    /// the ask.
    pub fn prefill(&mut self, n: usize) -> Result<(), InitError> {
        let mut cells = self.store.cells.lock().unwrap();
        if cells.len() < n {
            return Err(InitError::PoolExhausted {
                pool: self.store.name,
                wanted: n,
                available: cells.len(),
            });
        }
        let at = cells.len() - n;
        self.magazine.extend(cells.drain(at..));
        Ok(())
    }

    /// Take a cell. `None` means exhausted (or, for a per-CPU pool, a
    /// momentarily contended datastore): treat it as a transient
    /// failure and drop the item.
    pub fn alloc(&mut self) -> Option<Box<T>> {
        match self.scope {
            Scope::Global => self.store.cells.lock().unwrap().pop(),
            Scope::PerCpu => {
                if let Some(cell) = self.magazine.pop() {
                    return Some(cell);
                }
                let mut cells = self.store.cells.try_lock().ok()?;
                let take = self.store.chunk.min(cells.len());
                if take == 0 {
                    return None;
                }
                let at = cells.len() - take;
                self.magazine.extend(cells.drain(at..));
                drop(cells);
                self.magazine.pop()
            }
        }
    }

    /// Return a cell. Per-CPU pools spill surplus chunks back to the
    /// datastore so siblings can refill.
    pub fn free(&mut self, cell: Box<T>) {
        match self.scope {
            Scope::Global => self.store.cells.lock().unwrap().push(cell),
            Scope::PerCpu => {
                self.magazine.push(cell);
                if self.magazine.len() > 2 * self.store.chunk {
                    // Contention just means we keep the surplus local a
                    // little longer.
                    if let Ok(mut cells) = self.store.cells.try_lock() {
                        let at = self.magazine.len() - self.store.chunk;
                        cells.extend(self.magazine.drain(at..));
                    }
                }
            }
        }
    }

    /// Cells currently sitting in this pool's magazine.
    pub fn cached(&self) -> usize {
        self.magazine.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_cycles_cells() {
        let store = Datastore::new("t", 4, 2, || 0u64);
        let mut pool = Pool::attach(&store, Scope::PerCpu);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.free(a);
        pool.free(b);
        assert!(pool.alloc().is_some());
    }

    #[test]
    fn exhaustion_returns_none() {
        let store = Datastore::new("t", 2, 2, || 0u64);
        let mut pool = Pool::attach(&store, Scope::PerCpu);
        let _a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
    }

    #[test]
    fn prefill_fails_past_capacity() {
        let store = Datastore::new("t", 8, 4, || 0u64);
        let mut pool = Pool::attach(&store, Scope::PerCpu);
        assert!(pool.prefill(8).is_ok());
        let mut other = Pool::attach(&store, Scope::PerCpu);
        assert!(matches!(
            other.prefill(1),
            Err(InitError::PoolExhausted { .. })
        ));
    }

    #[test]
    fn global_scope_shares_directly() {
        let store = Datastore::new("t", 1, 1, || 0u64);
        let mut a = Pool::attach(&store, Scope::Global);
        let mut b = Pool::attach(&store, Scope::Global);
        let cell = a.alloc().unwrap();
        assert!(b.alloc().is_none());
        a.free(cell);
        assert!(b.alloc().is_some());
    }
}
