use std::{
    fmt,
    mem,
    ops::{Deref, DerefMut},
};

use ndarray::{Array2, ArrayViewMut2};

use super::{MemoryCache, cache::capacity_bytes};
use crate::{MlErr, Result};

/// A buffer borrowed from a `MemoryCache`, returned to it on drop.
pub struct CachedBuffer<'c> {
    cache: &'c MemoryCache,
    buf: Vec<f32>,
}

impl<'c> CachedBuffer<'c> {
    pub(super) fn new(cache: &'c MemoryCache, buf: Vec<f32>) -> Self {
        Self { cache, buf }
    }

    /// Turns this buffer into a row-major matrix.
    ///
    /// # Arguments
    /// * `shape` - The `(rows, cols)` of the matrix, must cover exactly the buffer's length.
    ///
    /// # Returns
    /// The matrix guard, or a size mismatch error leaving the buffer to be released.
    pub fn into_array(mut self, shape: (usize, usize)) -> Result<CachedArray<'c>> {
        let expected = shape.0 * shape.1;
        if self.buf.len() != expected {
            return Err(MlErr::SizeMismatch {
                what: "cached buffer length",
                got: self.buf.len(),
                expected,
            });
        }

        let buf = mem::take(&mut self.buf);
        let bytes = capacity_bytes(&buf);
        let cache = self.cache;

        match Array2::from_shape_vec(shape, buf) {
            Ok(array) => Ok(CachedArray { cache, array }),
            Err(e) => {
                cache.forget(bytes);
                Err(e.into())
            }
        }
    }
}

impl Deref for CachedBuffer<'_> {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for CachedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for CachedBuffer<'_> {
    fn drop(&mut self) {
        self.cache.release(mem::take(&mut self.buf));
    }
}

impl fmt::Debug for CachedBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedBuffer")
            .field("len", &self.buf.len())
            .finish()
    }
}

/// A matrix backed by a buffer borrowed from a `MemoryCache`.
///
/// Derefs to the underlying `Array2`, its storage goes back to the cache on drop. Writes go
/// through `view_mut` so the storage borrowed from the cache can't be swapped out.
pub struct CachedArray<'c> {
    cache: &'c MemoryCache,
    array: Array2<f32>,
}

impl CachedArray<'_> {
    /// A mutable view over the elements, the shape stays fixed.
    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.array.view_mut()
    }
}

impl Deref for CachedArray<'_> {
    type Target = Array2<f32>;

    fn deref(&self) -> &Self::Target {
        &self.array
    }
}

impl Drop for CachedArray<'_> {
    fn drop(&mut self) {
        let (buf, _) = mem::take(&mut self.array).into_raw_vec_and_offset();
        self.cache.release(buf);
    }
}

impl fmt::Debug for CachedArray<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedArray")
            .field("array", &self.array)
            .finish()
    }
}
