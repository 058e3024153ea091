//! N-dimensional sub-array copy engine.
//!
//! Arrays are flat buffers with an explicit shape. Dimension 0 varies
//! fastest (column-major), so the linear index of `idx` is
//! `sum(idx[i] * stride[i])` with `stride[0] = 1` and
//! `stride[i] = stride[i-1] * dims[i-1]`.
//!
//! A [`CopyPlan`] turns a hyper-rectangle copy into the smallest sequence of
//! contiguous runs: leading dimensions that are copied whole in both arrays
//! are folded into a single run.

use crate::error::{Result, ValueError};

/// One contiguous block copy between two flat buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRun {
    /// Linear start index in the source buffer.
    pub offset_a: usize,
    /// Linear start index in the destination buffer.
    pub offset_b: usize,
    /// Number of consecutive elements.
    pub len: usize,
}

/// Iterator over the contiguous runs of a sub-array copy.
#[derive(Debug, Clone)]
pub struct CopyPlan {
    strides_a: Vec<usize>,
    strides_b: Vec<usize>,
    pos_a: Vec<usize>,
    pos_b: Vec<usize>,
    count: Vec<usize>,
    merged: usize,
    run_len: usize,
    cursor: Vec<usize>,
    done: bool,
}

impl CopyPlan {
    /// Validate shapes and build a plan.
    ///
    /// All five vectors must have the same length and every
    /// `pos[i] + count[i]` must fit inside `dims[i]`.
    pub fn new(
        dims_a: &[usize],
        pos_a: &[usize],
        dims_b: &[usize],
        pos_b: &[usize],
        count: &[usize],
    ) -> Result<Self> {
        let n = count.len();
        if dims_a.len() != n || pos_a.len() != n || dims_b.len() != n || pos_b.len() != n {
            return Err(ValueError::DimensionMismatch(format!(
                "dimension count differs: dims_a={} pos_a={} dims_b={} pos_b={} count={}",
                dims_a.len(),
                pos_a.len(),
                dims_b.len(),
                pos_b.len(),
                n
            )));
        }
        check_bounds("source", dims_a, pos_a, count)?;
        check_bounds("destination", dims_b, pos_b, count)?;

        let strides_a = strides(dims_a);
        let strides_b = strides(dims_b);

        let mut merged = 0;
        let mut run_len = 1;
        let mut done = false;
        if n > 0 {
            if count.contains(&0) {
                done = true;
            } else {
                run_len = count[0];
                merged = 1;
                while merged < n
                    && count[merged - 1] == dims_a[merged - 1]
                    && count[merged - 1] == dims_b[merged - 1]
                {
                    run_len *= count[merged];
                    merged += 1;
                }
            }
        }

        Ok(Self {
            strides_a,
            strides_b,
            pos_a: pos_a.to_vec(),
            pos_b: pos_b.to_vec(),
            count: count.to_vec(),
            merged,
            run_len,
            cursor: vec![0; n],
            done,
        })
    }

    /// Total number of elements the plan copies.
    pub fn element_count(&self) -> usize {
        self.count.iter().product()
    }

    /// Number of elements moved per run.
    pub fn run_len(&self) -> usize {
        self.run_len
    }

    fn current_run(&self) -> CopyRun {
        let mut offset_a = 0;
        let mut offset_b = 0;
        for i in 0..self.count.len() {
            let idx = if i < self.merged { 0 } else { self.cursor[i] };
            offset_a += (self.pos_a[i] + idx) * self.strides_a[i];
            offset_b += (self.pos_b[i] + idx) * self.strides_b[i];
        }
        CopyRun {
            offset_a,
            offset_b,
            len: self.run_len,
        }
    }

    fn advance(&mut self) {
        for k in self.merged..self.count.len() {
            self.cursor[k] += 1;
            if self.cursor[k] < self.count[k] {
                return;
            }
            self.cursor[k] = 0;
        }
        self.done = true;
    }
}

impl Iterator for CopyPlan {
    type Item = CopyRun;

    fn next(&mut self) -> Option<CopyRun> {
        if self.done {
            return None;
        }
        let run = self.current_run();
        self.advance();
        Some(run)
    }
}

/// Copy a hyper-rectangle from `src` (shape `dims_a`) into `dst` (shape `dims_b`).
pub fn copy_sub_array<T: Clone>(
    src: &[T],
    dims_a: &[usize],
    pos_a: &[usize],
    dst: &mut [T],
    dims_b: &[usize],
    pos_b: &[usize],
    count: &[usize],
) -> Result<()> {
    check_len("source", src.len(), dims_a)?;
    check_len("destination", dst.len(), dims_b)?;
    let plan = CopyPlan::new(dims_a, pos_a, dims_b, pos_b, count)?;
    for run in plan {
        dst[run.offset_b..run.offset_b + run.len]
            .clone_from_slice(&src[run.offset_a..run.offset_a + run.len]);
    }
    Ok(())
}

/// Product of a shape vector, failing on overflow.
pub fn element_count(dims: &[usize]) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| ValueError::DimensionMismatch(format!("shape {dims:?} overflows")))
    })
}

/// Convert wire-width indices to native indices.
pub fn to_indices<T: Copy + TryInto<usize>>(values: &[T]) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|&v| {
            v.try_into()
                .map_err(|_| ValueError::OutOfRange("index does not fit in usize".to_string()))
        })
        .collect()
}

fn strides(dims: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(dims.len());
    let mut stride = 1usize;
    for &d in dims {
        out.push(stride);
        stride = stride.saturating_mul(d);
    }
    out
}

fn check_bounds(side: &str, dims: &[usize], pos: &[usize], count: &[usize]) -> Result<()> {
    for i in 0..dims.len() {
        let end = pos[i].checked_add(count[i]);
        if end.is_none_or(|end| end > dims[i]) {
            return Err(ValueError::DimensionMismatch(format!(
                "{side} dimension {i}: pos {} + count {} exceeds {}",
                pos[i], count[i], dims[i]
            )));
        }
    }
    Ok(())
}

fn check_len(side: &str, len: usize, dims: &[usize]) -> Result<()> {
    let expected = element_count(dims)?;
    if len != expected {
        return Err(ValueError::DimensionMismatch(format!(
            "{side} buffer holds {len} elements, shape {dims:?} needs {expected}"
        )));
    }
    Ok(())
}
