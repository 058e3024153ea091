use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use raconteur_stub::SliceCodec;
use raconteur_value::copy::to_indices;
use raconteur_value::{copy_sub_array, EntryType, MessageElement, MessageEntry, MultiDimArray, ValueError};
use tracing::debug;

use super::{
    dims_u32, dims_u64, span, window, ArrayMemory, MultiDimArrayMemory, COUNT, DATA, DIMENSIONS,
    DIM_COUNT, LENGTH, MAX_TRANSFER_SIZE, MEMORYPOS, PARAMETER, RETURN,
};
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::service::ServiceClient;

fn get_param(
    client: &ServiceClient,
    name: &str,
    config: &MemoryConfig,
    param: &str,
) -> Result<MessageEntry> {
    let entry = MessageEntry::new(EntryType::MemoryGetParamReq, name)
        .with_element(MessageElement::string(PARAMETER, param));
    client.request(entry, config.request_timeout)
}

/// Memory position of the chunk at `offset` within a transfer.
fn chunk_pos(memorypos: u64, offset: u64) -> Result<u64> {
    memorypos.checked_add(offset).ok_or_else(|| {
        ValueError::OutOfRange(format!("memory position {memorypos} + {offset} overflows")).into()
    })
}

/// Remote flat memory.
///
/// Transfers larger than the smaller of the configured and the service's
/// maximum transfer size are split into several requests.
pub struct ArrayMemoryClient<C: SliceCodec> {
    name: String,
    client: Arc<ServiceClient>,
    config: MemoryConfig,
    chunk: Mutex<Option<u64>>,
    _codec: PhantomData<fn() -> C>,
}

impl<C: SliceCodec> ArrayMemoryClient<C> {
    pub fn new(client: &Arc<ServiceClient>, name: &str, config: MemoryConfig) -> Self {
        Self {
            name: name.to_string(),
            client: Arc::clone(client),
            config,
            chunk: Mutex::new(None),
            _codec: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Largest element count the service accepts in one request.
    pub fn max_transfer_size(&self) -> Result<u64> {
        let response = get_param(&self.client, &self.name, &self.config, MAX_TRANSFER_SIZE)?;
        Ok(response.find(RETURN)?.data.as_scalar::<u64>()?)
    }

    fn chunk_size(&self) -> Result<u64> {
        let mut chunk = self.chunk.lock();
        if let Some(size) = *chunk {
            return Ok(size);
        }
        let size = self.config.max_transfer_size.min(self.max_transfer_size()?).max(1);
        debug!(member = %self.name, size, "memory transfer chunk size");
        *chunk = Some(size);
        Ok(size)
    }

    fn request(&self, kind: EntryType, memorypos: u64, count: u64) -> MessageEntry {
        MessageEntry::new(kind, self.name.as_str())
            .with_element(MessageElement::scalar(MEMORYPOS, memorypos))
            .with_element(MessageElement::scalar(COUNT, count))
    }

    /// Visit `(offset, len)` pieces of a transfer of `count` elements.
    fn chunks(&self, count: u64, mut visit: impl FnMut(u64, u64) -> Result<()>) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let size = self.chunk_size()?;
        let mut done = 0;
        while done < count {
            let len = size.min(count - done);
            visit(done, len)?;
            done += len;
        }
        Ok(())
    }
}

impl<C: SliceCodec> ArrayMemory<C::Element> for ArrayMemoryClient<C> {
    fn length(&self) -> Result<u64> {
        let response = get_param(&self.client, &self.name, &self.config, LENGTH)?;
        Ok(response.find(RETURN)?.data.as_scalar::<u64>()?)
    }

    fn read(&self, memorypos: u64, buffer: &mut [C::Element], bufferpos: u64, count: u64) -> Result<()> {
        let target = span("buffer", buffer.len(), bufferpos, count)?;
        let target = &mut buffer[target];
        self.chunks(count, |offset, len| {
            let request = self.request(EntryType::MemoryReadReq, chunk_pos(memorypos, offset)?, len);
            let response = self.client.request(request, self.config.request_timeout)?;
            let data = C::unpack_slice(&response.find(DATA)?.data)?;
            if data.len() as u64 != len {
                return Err(ValueError::DimensionMismatch(format!(
                    "read returned {} elements, expected {len}",
                    data.len()
                ))
                .into());
            }
            let start = offset as usize;
            target[start..start + data.len()].clone_from_slice(&data);
            Ok(())
        })
    }

    fn write(&self, memorypos: u64, buffer: &[C::Element], bufferpos: u64, count: u64) -> Result<()> {
        let source = &buffer[span("buffer", buffer.len(), bufferpos, count)?];
        self.chunks(count, |offset, len| {
            let start = offset as usize;
            let piece = &source[start..start + len as usize];
            let request = self
                .request(EntryType::MemoryWriteReq, chunk_pos(memorypos, offset)?, len)
                .with_element(MessageElement::new(DATA, C::pack_slice(piece)?));
            self.client.request(request, self.config.request_timeout)?;
            Ok(())
        })
    }
}

/// Remote multi-dimensional memory.
///
/// Each read or write moves the whole window in one request. A scratch
/// buffer is used only when the caller's buffer is not exactly the window.
pub struct MultiDimArrayMemoryClient<C: SliceCodec> {
    name: String,
    client: Arc<ServiceClient>,
    config: MemoryConfig,
    _codec: PhantomData<fn() -> C>,
}

impl<C: SliceCodec> MultiDimArrayMemoryClient<C> {
    pub fn new(client: &Arc<ServiceClient>, name: &str, config: MemoryConfig) -> Self {
        Self {
            name: name.to_string(),
            client: Arc::clone(client),
            config,
            _codec: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn request(&self, kind: EntryType, memorypos: &[u64], count: &[u64]) -> MessageEntry {
        MessageEntry::new(kind, self.name.as_str())
            .with_element(MessageElement::numeric(MEMORYPOS, memorypos.to_vec()))
            .with_element(MessageElement::numeric(COUNT, count.to_vec()))
    }
}

/// True when `buffer` at `bufferpos` is exactly a `count` shaped window.
fn is_whole<E: Clone>(buffer: &MultiDimArray<E>, bufferpos: &[u64], count: &[u64]) -> bool {
    bufferpos.iter().all(|&p| p == 0) && dims_u64(buffer.dims()) == count
}

impl<C: SliceCodec> MultiDimArrayMemory<C::Element> for MultiDimArrayMemoryClient<C> {
    fn dimensions(&self) -> Result<Vec<u64>> {
        let response = get_param(&self.client, &self.name, &self.config, DIMENSIONS)?;
        Ok(response.find(RETURN)?.data.as_slice::<u64>()?.to_vec())
    }

    fn dim_count(&self) -> Result<usize> {
        let response = get_param(&self.client, &self.name, &self.config, DIM_COUNT)?;
        let count = response.find(RETURN)?.data.as_scalar::<u64>()?;
        usize::try_from(count)
            .map_err(|_| ValueError::OutOfRange(format!("dimension count {count}")).into())
    }

    fn read(
        &self,
        memorypos: &[u64],
        buffer: &mut MultiDimArray<C::Element>,
        bufferpos: &[u64],
        count: &[u64],
    ) -> Result<()> {
        if bufferpos.len() != count.len() || buffer.dim_count() != count.len() {
            return Err(ValueError::DimensionMismatch(format!(
                "buffer has {} dimensions, position {} and count {}",
                buffer.dim_count(),
                bufferpos.len(),
                count.len()
            ))
            .into());
        }
        let request = self.request(EntryType::MemoryReadReq, memorypos, count);
        let response = self.client.request(request, self.config.request_timeout)?;
        let data = C::unpack_multidim(&response.find(DATA)?.data)?;
        if dims_u64(data.dims()) != count {
            return Err(ValueError::DimensionMismatch(format!(
                "read returned shape {:?}, expected {count:?}",
                data.dims()
            ))
            .into());
        }
        if is_whole(buffer, bufferpos, count) {
            *buffer = data;
            return Ok(());
        }
        let buffer_dims = to_indices(buffer.dims())?;
        let origin = vec![0usize; count.len()];
        copy_sub_array(
            data.array(),
            &to_indices(data.dims())?,
            &origin,
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
        buffer: &MultiDimArray<C::Element>,
        bufferpos: &[u64],
        count: &[u64],
    ) -> Result<()> {
        let data = if is_whole(buffer, bufferpos, count) {
            C::pack_multidim(buffer)?
        } else {
            window("buffer", &dims_u64(buffer.dims()), bufferpos, count)?;
            let mut scratch = MultiDimArray::filled(dims_u32(count)?, C::Element::default())?;
            let origin = vec![0usize; count.len()];
            copy_sub_array(
                buffer.array(),
                &to_indices(buffer.dims())?,
                &to_indices(bufferpos)?,
                scratch.array_mut(),
                &to_indices(&dims_u32(count)?)?,
                &origin,
                &to_indices(count)?,
            )?;
            C::pack_multidim(&scratch)?
        };
        let request = self
            .request(EntryType::MemoryWriteReq, memorypos, count)
            .with_element(MessageElement::new(DATA, data));
        self.client.request(request, self.config.request_timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use raconteur_stub::{ArrayCodec, RecordArrayCodec};

    use super::*;
    use crate::error::MemberError;
    use crate::memory::{
        ArrayMemoryServer, LocalArrayMemory, LocalMultiDimArrayMemory, MultiDimArrayMemoryServer,
    };
    use crate::testing::{link, Frame};

    #[test]
    fn pod_array_scenario() {
        let (host, client) = link();
        let memory = Arc::new(LocalArrayMemory::new(vec![Frame::default(); 1024]));
        ArrayMemoryServer::<RecordArrayCodec<Frame>>::register(&host, "frames", memory.clone(), 4096)
            .unwrap();
        let remote = ArrayMemoryClient::<RecordArrayCodec<Frame>>::new(&client, "frames", MemoryConfig::default());
        assert_eq!(remote.length().unwrap(), 1024);

        let buffer: Vec<Frame> = (0..1024).map(|i| Frame::numbered(i + 50)).collect();
        remote.write(52, &buffer, 3, 17).unwrap();

        let mut back = vec![Frame::default(); 20];
        remote.read(53, &mut back, 2, 16).unwrap();
        let ids: Vec<u32> = back[2..18].iter().map(|f| f.seq).collect();
        assert_eq!(ids, (54..70).collect::<Vec<u32>>());
        assert_eq!(back[2..18], buffer[4..20]);
        assert_eq!(memory.to_vec()[52], Frame::numbered(53));
        assert_eq!(back[0], Frame::default());
    }

    #[test]
    fn large_transfers_are_chunked() {
        let (host, client) = link();
        let memory = Arc::new(LocalArrayMemory::new(vec![0.0f64; 100]));
        ArrayMemoryServer::<ArrayCodec<f64>>::register(&host, "samples", memory.clone(), 8).unwrap();
        let config = MemoryConfig {
            max_transfer_size: 32,
            ..MemoryConfig::default()
        };
        let remote = ArrayMemoryClient::<ArrayCodec<f64>>::new(&client, "samples", config);
        assert_eq!(remote.max_transfer_size().unwrap(), 8);

        let values: Vec<f64> = (0..100).map(f64::from).collect();
        remote.write(0, &values, 0, 100).unwrap();
        assert_eq!(memory.to_vec(), values);

        let mut back = vec![0.0; 100];
        remote.read(10, &mut back, 0, 90).unwrap();
        assert_eq!(&back[..90], &values[10..]);
    }

    #[test]
    fn chunk_positions_cannot_overflow() {
        assert_eq!(chunk_pos(10, 6).unwrap(), 16);
        assert_eq!(chunk_pos(u64::MAX - 4, 4).unwrap(), u64::MAX);
        assert!(matches!(
            chunk_pos(u64::MAX - 4, 5),
            Err(MemberError::Value(ValueError::OutOfRange(_)))
        ));
    }

    #[test]
    fn remote_bounds_errors_are_rehydrated() {
        let (host, client) = link();
        let memory = Arc::new(LocalArrayMemory::new(vec![0u16; 16]));
        ArrayMemoryServer::<ArrayCodec<u16>>::register(&host, "regs", memory, 64).unwrap();
        let remote = ArrayMemoryClient::<ArrayCodec<u16>>::new(&client, "regs", MemoryConfig::default());

        let mut buffer = vec![0u16; 8];
        assert!(matches!(
            remote.read(12, &mut buffer, 0, 8),
            Err(MemberError::Value(ValueError::OutOfRange(_)))
        ));
        assert!(matches!(
            remote.write(0, &buffer, 4, 8),
            Err(MemberError::Value(ValueError::OutOfRange(_)))
        ));
    }

    #[test]
    fn multidim_window_round_trip() {
        let (host, client) = link();
        let memory = Arc::new(LocalMultiDimArrayMemory::new(
            MultiDimArray::new(vec![4, 3], (0..12).collect::<Vec<i32>>()).unwrap(),
        ));
        MultiDimArrayMemoryServer::<ArrayCodec<i32>>::register(&host, "grid", memory.clone(), 64).unwrap();
        let remote = MultiDimArrayMemoryClient::<ArrayCodec<i32>>::new(&client, "grid", MemoryConfig::default());
        assert_eq!(remote.dimensions().unwrap(), vec![4, 3]);
        assert_eq!(remote.dim_count().unwrap(), 2);

        // Exact window.
        let mut exact = MultiDimArray::filled(vec![2, 2], 0).unwrap();
        remote.read(&[1, 1], &mut exact, &[0, 0], &[2, 2]).unwrap();
        assert_eq!(exact.array(), &[5, 6, 9, 10]);

        // Window inside a larger buffer.
        let mut larger = MultiDimArray::filled(vec![3, 3], -1).unwrap();
        remote.read(&[0, 0], &mut larger, &[1, 1], &[2, 2]).unwrap();
        assert_eq!(larger.get(&[1, 1]), Some(&0));
        assert_eq!(larger.get(&[2, 2]), Some(&5));
        assert_eq!(larger.get(&[0, 0]), Some(&-1));

        let patch = MultiDimArray::new(vec![2, 2], vec![100, 101, 102, 103]).unwrap();
        remote.write(&[2, 1], &patch, &[1, 0], &[1, 2]).unwrap();
        let after = memory.snapshot();
        assert_eq!(after.get(&[2, 1]), Some(&101));
        assert_eq!(after.get(&[2, 2]), Some(&103));
        assert_eq!(after.get(&[1, 1]), Some(&5));

        assert!(matches!(
            remote.read(&[3, 0], &mut exact, &[0, 0], &[2, 2]),
            Err(MemberError::Value(_))
        ));
    }
}
