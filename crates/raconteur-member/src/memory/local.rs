use parking_lot::RwLock;
use raconteur_value::copy::to_indices;
use raconteur_value::{copy_sub_array, MultiDimArray};

use super::{dims_u64, span, ArrayMemory, MultiDimArrayMemory};
use crate::error::Result;

/// Flat memory held in this process.
pub struct LocalArrayMemory<E> {
    data: RwLock<Vec<E>>,
}

impl<E> LocalArrayMemory<E> {
    pub fn new(data: Vec<E>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn into_inner(self) -> Vec<E> {
        self.data.into_inner()
    }
}

impl<E: Clone> LocalArrayMemory<E> {
    pub fn to_vec(&self) -> Vec<E> {
        self.data.read().clone()
    }
}

impl<E: Clone + Send + Sync> ArrayMemory<E> for LocalArrayMemory<E> {
    fn length(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn read(&self, memorypos: u64, buffer: &mut [E], bufferpos: u64, count: u64) -> Result<()> {
        let data = self.data.read();
        let from = span("memory", data.len(), memorypos, count)?;
        let to = span("buffer", buffer.len(), bufferpos, count)?;
        buffer[to].clone_from_slice(&data[from]);
        Ok(())
    }

    fn write(&self, memorypos: u64, buffer: &[E], bufferpos: u64, count: u64) -> Result<()> {
        let mut data = self.data.write();
        let to = span("memory", data.len(), memorypos, count)?;
        let from = span("buffer", buffer.len(), bufferpos, count)?;
        data[to].clone_from_slice(&buffer[from]);
        Ok(())
    }
}

/// Multi-dimensional memory held in this process.
pub struct LocalMultiDimArrayMemory<E> {
    data: RwLock<MultiDimArray<E>>,
}

impl<E> LocalMultiDimArrayMemory<E> {
    pub fn new(data: MultiDimArray<E>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl<E: Clone> LocalMultiDimArrayMemory<E> {
    pub fn snapshot(&self) -> MultiDimArray<E> {
        self.data.read().clone()
    }
}

impl<E: Clone + Send + Sync> MultiDimArrayMemory<E> for LocalMultiDimArrayMemory<E> {
    fn dimensions(&self) -> Result<Vec<u64>> {
        Ok(dims_u64(self.data.read().dims()))
    }

    fn dim_count(&self) -> Result<usize> {
        Ok(self.data.read().dim_count())
    }

    fn read(
        &self,
        memorypos: &[u64],
        buffer: &mut MultiDimArray<E>,
        bufferpos: &[u64],
        count: &[u64],
    ) -> Result<()> {
        let data = self.data.read();
        let buffer_dims = to_indices(buffer.dims())?;
        copy_sub_array(
            data.array(),
            &to_indices(data.dims())?,
            &to_indices(memorypos)?,
            buffer.array_mut(),
            &buffer_dims,
            &to_indices(bufferpos)?,
            &to_indices(count)?,
        )?;
        Ok(())
    }

    fn write(
        &self,
        memorypos: &[u64],
        buffer: &MultiDimArray<E>,
        bufferpos: &[u64],
        count: &[u64],
    ) -> Result<()> {
        let mut data = self.data.write();
        let memory_dims = to_indices(data.dims())?;
        copy_sub_array(
            buffer.array(),
            &to_indices(buffer.dims())?,
            &to_indices(bufferpos)?,
            data.array_mut(),
            &memory_dims,
            &to_indices(memorypos)?,
            &to_indices(count)?,
        )?;
        Ok(())
    }
}
