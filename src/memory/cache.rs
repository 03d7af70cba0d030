use std::{collections::BTreeMap, mem};

use log::debug;
use parking_lot::Mutex;

use super::{CachedArray, CachedBuffer};
use crate::{MlErr, Result};

const MIB: usize = 1024 * 1024;

/// A bounded pool of reusable `f32` buffers.
///
/// Buffers are handed out in power-of-two size classes and come back to the pool when their
/// guard is dropped. The total amount of bytes held by the pool, whether in use or idle, never
/// exceeds the configured capacity.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    pool: Mutex<Pool>,
}

#[derive(Debug, Default)]
struct Pool {
    free: BTreeMap<usize, Vec<Vec<f32>>>,
    held: usize,
    in_use: usize,
    allocations: usize,
}

impl MemoryCache {
    /// Creates a new `MemoryCache`.
    ///
    /// # Arguments
    /// * `megabytes` - The capacity of the cache in MiB.
    pub fn new(megabytes: usize) -> Self {
        Self::with_capacity_bytes(megabytes.saturating_mul(MIB))
    }

    /// Creates a new `MemoryCache` holding at most `capacity` bytes.
    pub fn with_capacity_bytes(capacity: usize) -> Self {
        Self {
            capacity,
            pool: Mutex::new(Pool::default()),
        }
    }

    /// Borrows a zeroed buffer of `len` elements.
    ///
    /// An idle buffer of a large enough class is reused when available. Otherwise a new one is
    /// allocated, reclaiming every idle buffer first if the capacity would be exceeded.
    ///
    /// # Arguments
    /// * `len` - The amount of `f32` elements requested.
    ///
    /// # Returns
    /// A guard over the buffer or `MlErr::CacheExhausted` if the request can't fit.
    pub fn acquire(&self, len: usize) -> Result<CachedBuffer<'_>> {
        let class = size_class(len).ok_or_else(|| self.exhausted(usize::MAX))?;
        let bytes = class_bytes(class).ok_or_else(|| self.exhausted(usize::MAX))?;

        let mut pool = self.pool.lock();
        let mut buf = match pool.take_free(class) {
            Some(buf) => buf,
            None => {
                if pool.held + bytes > self.capacity {
                    pool.reclaim();
                }

                if pool.held + bytes > self.capacity {
                    return Err(MlErr::CacheExhausted {
                        requested: bytes,
                        capacity: self.capacity,
                        in_use: pool.in_use,
                    });
                }

                pool.held += bytes;
                pool.allocations += 1;
                Vec::with_capacity(class)
            }
        };
        pool.in_use += capacity_bytes(&buf);
        drop(pool);

        buf.clear();
        buf.resize(len, 0.);
        Ok(CachedBuffer::new(self, buf))
    }

    /// Borrows a zeroed matrix of the given shape.
    ///
    /// # Arguments
    /// * `shape` - The `(rows, cols)` of the matrix.
    ///
    /// # Returns
    /// A guard over the matrix or `MlErr::CacheExhausted` if the request can't fit.
    pub fn acquire_array(&self, shape: (usize, usize)) -> Result<CachedArray<'_>> {
        let len = shape
            .0
            .checked_mul(shape.1)
            .ok_or_else(|| self.exhausted(usize::MAX))?;

        self.acquire(len)?.into_array(shape)
    }

    /// Drops every idle buffer, giving its memory back to the allocator.
    pub fn reclaim(&self) {
        self.pool.lock().reclaim();
    }

    /// The amount of fresh allocations performed so far.
    pub fn allocations(&self) -> usize {
        self.pool.lock().allocations
    }

    /// The bytes currently lent out.
    pub fn in_use_bytes(&self) -> usize {
        self.pool.lock().in_use
    }

    /// The bytes held by the pool, lent out or idle.
    pub fn cached_bytes(&self) -> usize {
        self.pool.lock().held
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity
    }

    pub(super) fn release(&self, buf: Vec<f32>) {
        let bytes = capacity_bytes(&buf);
        if bytes == 0 {
            return;
        }

        let mut pool = self.pool.lock();
        pool.in_use -= bytes;
        pool.free.entry(floor_class(buf.capacity())).or_default().push(buf);
    }

    /// Accounts for a buffer that was lost without being returned.
    pub(super) fn forget(&self, bytes: usize) {
        let mut pool = self.pool.lock();
        pool.in_use -= bytes;
        pool.held -= bytes;
    }

    fn exhausted(&self, requested: usize) -> MlErr {
        MlErr::CacheExhausted {
            requested,
            capacity: self.capacity,
            in_use: self.in_use_bytes(),
        }
    }
}

impl Pool {
    fn take_free(&mut self, class: usize) -> Option<Vec<f32>> {
        let (&key, bufs) = self.free.range_mut(class..).next()?;
        let buf = bufs.pop();

        if bufs.is_empty() {
            self.free.remove(&key);
        }

        buf
    }

    fn reclaim(&mut self) {
        let free = mem::take(&mut self.free);
        let mut reclaimed = 0;

        for buf in free.into_values().flatten() {
            reclaimed += capacity_bytes(&buf);
        }

        if reclaimed > 0 {
            debug!("memory cache reclaimed {reclaimed} idle bytes");
        }

        self.held -= reclaimed;
    }
}

fn size_class(len: usize) -> Option<usize> {
    len.max(1).checked_next_power_of_two()
}

fn class_bytes(class: usize) -> Option<usize> {
    class.checked_mul(mem::size_of::<f32>())
}

fn floor_class(capacity: usize) -> usize {
    1 << capacity.ilog2()
}

pub(super) fn capacity_bytes(buf: &Vec<f32>) -> usize {
    match buf.capacity() {
        0 => 0,
        capacity => floor_class(capacity) * mem::size_of::<f32>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F32: usize = mem::size_of::<f32>();

    #[test]
    fn reuses_released_buffers() {
        let cache = MemoryCache::with_capacity_bytes(1024 * F32);

        for _ in 0..10 {
            let buf = cache.acquire(100).unwrap();
            assert_eq!(buf.len(), 100);
        }

        assert_eq!(cache.allocations(), 1);
        assert_eq!(cache.in_use_bytes(), 0);
        assert_eq!(cache.cached_bytes(), 128 * F32);
    }

    #[test]
    fn acquired_buffers_are_zeroed() {
        let cache = MemoryCache::with_capacity_bytes(1024 * F32);

        {
            let mut buf = cache.acquire(8).unwrap();
            buf.fill(3.);
        }

        let buf = cache.acquire(8).unwrap();
        assert!(buf.iter().all(|&x| x == 0.));
    }

    #[test]
    fn smaller_request_reuses_larger_class() {
        let cache = MemoryCache::with_capacity_bytes(1024 * F32);

        drop(cache.acquire(256).unwrap());
        let buf = cache.acquire(10).unwrap();

        assert_eq!(buf.len(), 10);
        assert_eq!(cache.allocations(), 1);
        assert_eq!(cache.in_use_bytes(), 256 * F32);
    }

    #[test]
    fn exhaustion_is_reported() {
        let cache = MemoryCache::with_capacity_bytes(64 * F32);

        let _held = cache.acquire(64).unwrap();
        let err = cache.acquire(1).unwrap_err();

        assert!(matches!(
            err,
            MlErr::CacheExhausted {
                requested,
                in_use,
                ..
            } if requested == F32 && in_use == 64 * F32
        ));
    }

    #[test]
    fn idle_buffers_are_reclaimed_under_pressure() {
        let cache = MemoryCache::with_capacity_bytes(64 * F32);

        drop(cache.acquire(32).unwrap());
        drop(cache.acquire(16).unwrap());
        let buf = cache.acquire(64).unwrap();

        assert_eq!(buf.len(), 64);
        assert_eq!(cache.cached_bytes(), 64 * F32);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let cache = MemoryCache::with_capacity_bytes(100 * F32);
        let mut held = Vec::new();

        for len in [10, 20, 30, 40, 50] {
            if let Ok(buf) = cache.acquire(len) {
                held.push(buf);
            }

            assert!(cache.cached_bytes() <= cache.capacity_bytes());
        }
    }

    #[test]
    fn arrays_return_their_buffer() {
        let cache = MemoryCache::with_capacity_bytes(1024 * F32);

        {
            let mut array = cache.acquire_array((3, 5)).unwrap();
            assert_eq!(array.dim(), (3, 5));
            array.view_mut()[[2, 4]] = 1.;
            assert_eq!(cache.in_use_bytes(), 16 * F32);
        }

        assert_eq!(cache.in_use_bytes(), 0);
        let _again = cache.acquire_array((5, 3)).unwrap();
        assert_eq!(cache.allocations(), 1);
    }

    #[test]
    fn array_writes_keep_the_borrowed_storage() {
        let cache = MemoryCache::with_capacity_bytes(1024 * F32);

        {
            let mut array = cache.acquire_array((4, 4)).unwrap();
            array.view_mut().fill(2.);
            array.view_mut().row_mut(1).fill(1.);

            assert_eq!(array.sum(), 28.);
            assert_eq!(cache.in_use_bytes(), 16 * F32);
        }

        assert_eq!(cache.in_use_bytes(), 0);
        assert_eq!(cache.cached_bytes(), 16 * F32);
    }

    #[test]
    fn megabyte_capacity() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.capacity_bytes(), 16 * MIB);
    }
}
