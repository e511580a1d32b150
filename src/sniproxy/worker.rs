use std::cell::Cell;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

// faster than xorshift128+ and better quality (see https://github.com/lemire/testingRNG)
use nanorand::{WyRand, Rng};

use crate::sniproxy::common::fast_modulo32;

thread_local! {
    static CURRENT_WORKER: Cell<*const Worker> = Cell::new(std::ptr::null());
}

static mut ALL_WORKERS: &[Worker] = &[];

/// Worker is thread-local storage for the one tokio worker thread it's bound to: a
/// per-thread RNG used for backend address selection. It corresponds 1-to-1 with tokio
/// worker threads, same as the shards of the ConnectionTable.
///
/// All Worker methods take &mut self, because there should never be more than one reference
/// to a Worker held across an await point; holding one across await and then recursing into
/// Worker::get() will panic.
pub struct Worker {
    pub id: u32,
    rng: WyRand,
}

/// # Safety
/// Must be called exactly once, before the runtime starts any task that might call
/// `Worker::get`/`try_get`, and never again afterward.
pub unsafe fn init_workers(num_workers: u32) {
    let workers: Vec<_> = (0..num_workers).map(|i| Worker::new(i + 1)).collect();
    ALL_WORKERS = &*workers.leak();
}

impl Worker {
    pub fn new(id: u32) -> Self {
        Worker { id, rng: WyRand::new() }
    }

    /// get returns a mutable Worker reference to the thread-local Worker.
    /// Panics if not called on one of the original tokio worker threads.
    pub fn get() -> &'static mut Worker {
        Self::try_get().expect("not a worker thread")
    }

    pub fn try_get() -> Option<&'static mut Worker> {
        static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);

        CURRENT_WORKER.with(|ctx| {
            // Safety: ALL_WORKERS has been initialized before this function is called
            unsafe {
                let mut p = ctx.get();
                if p.is_null() {
                    if NEXT_WORKER.load(Relaxed) < ALL_WORKERS.len() {
                        let worker = ALL_WORKERS.get_unchecked(NEXT_WORKER.fetch_add(1, Relaxed));
                        p = worker as _;
                        ctx.set(p);
                    } else {
                        return None;
                    }
                }
                Some(&mut *(p as *mut Worker))
            }
        })
    }

    pub fn rand32(&mut self) -> u32 {
        self.rng.generate()
    }

    /// Picks a uniformly-distributed index in [0, max) among the candidates for a backend
    /// dial, per route::resolver's "select among ready candidates at random" policy.
    pub fn uniform_rand32(&mut self, max: u32) -> u32 {
        fast_modulo32(self.rng.generate(), max)
    }
}
