//! Memory accessors: random access to flat and multi-dimensional arrays.
//!
//! The same traits cover memories held in this process and memories served
//! by a remote service. Out of bounds ranges fail with `OutOfRange`; shape
//! disagreements fail with `DimensionMismatch`. Nothing is truncated.

mod client;
mod local;
mod server;

pub use client::{ArrayMemoryClient, MultiDimArrayMemoryClient};
pub use local::{LocalArrayMemory, LocalMultiDimArrayMemory};
pub use server::{ArrayMemoryServer, MultiDimArrayMemoryServer};

use std::ops::Range;

use raconteur_value::{MultiDimArray, ValueError};

use crate::error::{MemberError, Result};

pub(crate) const MEMORYPOS: &str = "memorypos";
pub(crate) const COUNT: &str = "count";
pub(crate) const DATA: &str = "data";
pub(crate) const PARAMETER: &str = "parameter";
pub(crate) const RETURN: &str = "return";

pub(crate) const LENGTH: &str = "Length";
pub(crate) const MAX_TRANSFER_SIZE: &str = "MaxTransferSize";
pub(crate) const DIMENSIONS: &str = "Dimensions";
pub(crate) const DIM_COUNT: &str = "DimCount";

/// A flat array addressed by element position.
pub trait ArrayMemory<E>: Send + Sync {
    fn length(&self) -> Result<u64>;

    /// Copy `count` elements starting at `memorypos` into `buffer` at
    /// `bufferpos`.
    fn read(&self, memorypos: u64, buffer: &mut [E], bufferpos: u64, count: u64) -> Result<()>;

    /// Copy `count` elements from `buffer` at `bufferpos` into memory at
    /// `memorypos`.
    fn write(&self, memorypos: u64, buffer: &[E], bufferpos: u64, count: u64) -> Result<()>;
}

/// A column-major multi-dimensional array addressed by index vectors.
pub trait MultiDimArrayMemory<E>: Send + Sync {
    fn dimensions(&self) -> Result<Vec<u64>>;

    fn dim_count(&self) -> Result<usize>;

    fn read(
        &self,
        memorypos: &[u64],
        buffer: &mut MultiDimArray<E>,
        bufferpos: &[u64],
        count: &[u64],
    ) -> Result<()>;

    fn write(
        &self,
        memorypos: &[u64],
        buffer: &MultiDimArray<E>,
        bufferpos: &[u64],
        count: &[u64],
    ) -> Result<()>;
}

/// Validate `pos..pos + count` against a buffer of `len` elements.
pub(crate) fn span(what: &str, len: usize, pos: u64, count: u64) -> Result<Range<usize>> {
    let out_of_range = || {
        ValueError::OutOfRange(format!(
            "{what}: {count} elements at {pos} exceed length {len}"
        ))
    };
    let start = usize::try_from(pos).map_err(|_| out_of_range())?;
    let n = usize::try_from(count).map_err(|_| out_of_range())?;
    let end = start.checked_add(n).ok_or_else(out_of_range)?;
    if end > len {
        return Err(out_of_range().into());
    }
    Ok(start..end)
}

/// Validate a `count` window at `pos` against `dims` and return its
/// element count.
pub(crate) fn window(what: &str, dims: &[u64], pos: &[u64], count: &[u64]) -> Result<u64> {
    if pos.len() != dims.len() || count.len() != dims.len() {
        return Err(ValueError::DimensionMismatch(format!(
            "{what} has {} dimensions, position {} and count {}",
            dims.len(),
            pos.len(),
            count.len()
        ))
        .into());
    }
    let mut elements = 1u64;
    for ((&d, &p), &c) in dims.iter().zip(pos).zip(count) {
        let end = p.checked_add(c);
        if end.map_or(true, |end| end > d) {
            return Err(ValueError::OutOfRange(format!(
                "{what}: window {count:?} at {pos:?} exceeds shape {dims:?}"
            ))
            .into());
        }
        elements = elements.saturating_mul(c);
    }
    Ok(elements)
}

/// Shape vector in wire width.
pub(crate) fn dims_u64(dims: &[u32]) -> Vec<u64> {
    dims.iter().map(|&d| u64::from(d)).collect()
}

/// Shape vector in storage width.
pub(crate) fn dims_u32(dims: &[u64]) -> Result<Vec<u32>> {
    dims.iter()
        .map(|&d| {
            u32::try_from(d)
                .map_err(|_| MemberError::from(ValueError::OutOfRange(format!("dimension {d} too large"))))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_rejects_overruns() {
        assert_eq!(span("memory", 10, 2, 8).unwrap(), 2..10);
        assert_eq!(span("memory", 10, 10, 0).unwrap(), 10..10);
        assert!(matches!(
            span("memory", 10, 3, 8),
            Err(MemberError::Value(ValueError::OutOfRange(_)))
        ));
        assert!(span("buffer", 4, u64::MAX, 2).is_err());
    }

    #[test]
    fn window_checks_every_dimension() {
        assert_eq!(window("memory", &[4, 3], &[1, 1], &[3, 2]).unwrap(), 6);
        assert_eq!(window("memory", &[4, 3], &[4, 0], &[0, 3]).unwrap(), 0);
        assert!(matches!(
            window("memory", &[2, 2], &[0, 0], &[u64::from(u32::MAX), u64::from(u32::MAX)]),
            Err(MemberError::Value(ValueError::OutOfRange(_)))
        ));
        assert!(matches!(
            window("memory", &[2, 2], &[u64::MAX, 0], &[2, 1]),
            Err(MemberError::Value(ValueError::OutOfRange(_)))
        ));
        assert!(matches!(
            window("memory", &[2, 2], &[0], &[1, 1]),
            Err(MemberError::Value(ValueError::DimensionMismatch(_)))
        ));
    }

    #[test]
    fn dims_convert_both_ways() {
        assert_eq!(dims_u64(&[3, 4]), vec![3u64, 4]);
        assert_eq!(dims_u32(&[3, 4]).unwrap(), vec![3u32, 4]);
        assert!(dims_u32(&[u64::from(u32::MAX) + 1]).is_err());
    }
}
