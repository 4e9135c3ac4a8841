use std::sync::Mutex;
use tracing::{debug, trace};

/// Objects that can be recycled through a [RecyclablePool]. `reset` must restore the
///  object's mutable state to what a freshly created instance has, while keeping any
///  allocated capacity.
pub trait Recycle {
    fn reset(&mut self);
}

/// A capacity-bounded free list. Renting moves an object out of the pool (or creates a new
///  one if the pool is empty), and returning moves it back in, so an object can neither be
///  returned twice nor used after it was returned.
///
/// The pool is safe to share between the I/O side and the update side.
pub struct RecyclablePool<T> {
    name: &'static str,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    free: Mutex<Vec<T>>,
    max_pool_size: usize,
}

impl <T: Recycle> RecyclablePool<T> {
    pub fn new(name: &'static str, max_pool_size: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        RecyclablePool {
            name,
            factory: Box::new(factory),
            free: Mutex::new(Vec::with_capacity(max_pool_size)),
            max_pool_size,
        }
    }

    pub fn rent(&self) -> T {
        let pooled = self.free.lock().unwrap().pop();

        match pooled {
            Some(mut item) => {
                trace!("{}: returning pooled object", self.name);
                item.reset();
                item
            }
            None => {
                debug!("{}: no pooled object available - creating new instance", self.name);
                (self.factory)()
            }
        }
    }

    pub fn give_back(&self, item: T) {
        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_pool_size {
            trace!("{}: returning object to pool", self.name);
            free.push(item);
        }
        else {
            debug!("{}: pool is full - discarding returned object", self.name);
        }
    }

    /// the number of objects currently held in the pool
    pub fn available(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}
