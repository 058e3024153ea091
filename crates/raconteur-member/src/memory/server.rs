use std::marker::PhantomData;
use std::sync::Arc;

use raconteur_stub::SliceCodec;
use raconteur_transport::Endpoint;
use raconteur_value::{EntryType, MessageElement, MessageEntry, MultiDimArray, ValueError};
use tracing::debug;

use super::{
    dims_u32, dims_u64, window, ArrayMemory, MultiDimArrayMemory, COUNT, DATA, DIMENSIONS, DIM_COUNT,
    LENGTH, MAX_TRANSFER_SIZE, MEMORYPOS, PARAMETER, RETURN,
};
use crate::error::{MemberError, Result};
use crate::service::{MemberHandler, ServiceHost};

fn parameter(entry: &MessageEntry) -> Result<&str> {
    Ok(entry.find(PARAMETER)?.data.as_str()?)
}

fn unknown_parameter(member: &str, name: &str) -> MemberError {
    MemberError::InvalidOperation(format!("memory '{member}' has no parameter '{name}'"))
}

fn check_transfer(count: u64, max_transfer_size: u64) -> Result<usize> {
    if count > max_transfer_size {
        return Err(ValueError::OutOfRange(format!(
            "transfer of {count} elements exceeds {max_transfer_size}"
        ))
        .into());
    }
    usize::try_from(count)
        .map_err(|_| ValueError::OutOfRange(format!("transfer of {count} elements")).into())
}

/// Serves a flat memory to clients.
pub struct ArrayMemoryServer<C: SliceCodec> {
    name: String,
    memory: Arc<dyn ArrayMemory<C::Element>>,
    max_transfer_size: u64,
    _codec: PhantomData<fn() -> C>,
}

impl<C: SliceCodec> ArrayMemoryServer<C> {
    pub fn new(
        name: impl Into<String>,
        memory: Arc<dyn ArrayMemory<C::Element>>,
        max_transfer_size: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            memory,
            max_transfer_size,
            _codec: PhantomData,
        })
    }

    pub fn register(
        host: &ServiceHost,
        name: &str,
        memory: Arc<dyn ArrayMemory<C::Element>>,
        max_transfer_size: u64,
    ) -> Result<Arc<Self>> {
        let server = Self::new(name, memory, max_transfer_size);
        host.add_member(name, server.clone())?;
        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory(&self) -> &Arc<dyn ArrayMemory<C::Element>> {
        &self.memory
    }

    fn read(&self, entry: &MessageEntry) -> Result<MessageEntry> {
        let memorypos = entry.find(MEMORYPOS)?.data.as_scalar::<u64>()?;
        let count = entry.find(COUNT)?.data.as_scalar::<u64>()?;
        let mut buffer = vec![C::Element::default(); check_transfer(count, self.max_transfer_size)?];
        self.memory.read(memorypos, &mut buffer, 0, count)?;
        let mut response = entry.response()?;
        response.push(MessageElement::new(DATA, C::pack_slice(&buffer)?));
        Ok(response)
    }

    fn write(&self, entry: &MessageEntry) -> Result<MessageEntry> {
        let memorypos = entry.find(MEMORYPOS)?.data.as_scalar::<u64>()?;
        let count = entry.find(COUNT)?.data.as_scalar::<u64>()?;
        check_transfer(count, self.max_transfer_size)?;
        let data = C::unpack_slice(&entry.find(DATA)?.data)?;
        if data.len() as u64 != count {
            return Err(ValueError::DimensionMismatch(format!(
                "write carries {} elements, count is {count}",
                data.len()
            ))
            .into());
        }
        self.memory.write(memorypos, &data, 0, count)?;
        Ok(entry.response()?)
    }

    fn get_param(&self, entry: &MessageEntry) -> Result<MessageEntry> {
        let value = match parameter(entry)? {
            LENGTH => self.memory.length()?,
            MAX_TRANSFER_SIZE => self.max_transfer_size,
            other => return Err(unknown_parameter(&self.name, other)),
        };
        let mut response = entry.response()?;
        response.push(MessageElement::scalar(RETURN, value));
        Ok(response)
    }
}

impl<C: SliceCodec> MemberHandler for ArrayMemoryServer<C> {
    fn handle_request(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) -> Result<MessageEntry> {
        debug!(member = %self.name, endpoint = endpoint.local_id(), kind = ?entry.entry_type, "memory request");
        match entry.entry_type {
            EntryType::MemoryReadReq => self.read(&entry),
            EntryType::MemoryWriteReq => self.write(&entry),
            EntryType::MemoryGetParamReq => self.get_param(&entry),
            other => Err(MemberError::InvalidOperation(format!(
                "memory '{}' does not accept {other:?}",
                self.name
            ))),
        }
    }
}

/// Serves a multi-dimensional memory to clients.
///
/// Windows are checked against the memory's shape and the transfer cap
/// before any buffer is allocated.
pub struct MultiDimArrayMemoryServer<C: SliceCodec> {
    name: String,
    memory: Arc<dyn MultiDimArrayMemory<C::Element>>,
    max_transfer_size: u64,
    _codec: PhantomData<fn() -> C>,
}

impl<C: SliceCodec> MultiDimArrayMemoryServer<C> {
    pub fn new(
        name: impl Into<String>,
        memory: Arc<dyn MultiDimArrayMemory<C::Element>>,
        max_transfer_size: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            memory,
            max_transfer_size,
            _codec: PhantomData,
        })
    }

    pub fn register(
        host: &ServiceHost,
        name: &str,
        memory: Arc<dyn MultiDimArrayMemory<C::Element>>,
        max_transfer_size: u64,
    ) -> Result<Arc<Self>> {
        let server = Self::new(name, memory, max_transfer_size);
        host.add_member(name, server.clone())?;
        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_window(&self, memorypos: &[u64], count: &[u64]) -> Result<()> {
        let elements = window("memory", &self.memory.dimensions()?, memorypos, count)?;
        check_transfer(elements, self.max_transfer_size)?;
        Ok(())
    }

    fn read(&self, entry: &MessageEntry) -> Result<MessageEntry> {
        let memorypos = entry.find(MEMORYPOS)?.data.as_slice::<u64>()?;
        let count = entry.find(COUNT)?.data.as_slice::<u64>()?;
        self.check_window(memorypos, count)?;
        let mut buffer = MultiDimArray::filled(dims_u32(count)?, C::Element::default())?;
        let origin = vec![0u64; count.len()];
        self.memory.read(memorypos, &mut buffer, &origin, count)?;
        let mut response = entry.response()?;
        response.push(MessageElement::new(DATA, C::pack_multidim(&buffer)?));
        Ok(response)
    }

    fn write(&self, entry: &MessageEntry) -> Result<MessageEntry> {
        let memorypos = entry.find(MEMORYPOS)?.data.as_slice::<u64>()?;
        let count = entry.find(COUNT)?.data.as_slice::<u64>()?;
        self.check_window(memorypos, count)?;
        let buffer = C::unpack_multidim(&entry.find(DATA)?.data)?;
        if dims_u64(buffer.dims()) != count {
            return Err(ValueError::DimensionMismatch(format!(
                "write carries shape {:?}, count is {count:?}",
                buffer.dims()
            ))
            .into());
        }
        let origin = vec![0u64; count.len()];
        self.memory.write(memorypos, &buffer, &origin, count)?;
        Ok(entry.response()?)
    }

    fn get_param(&self, entry: &MessageEntry) -> Result<MessageEntry> {
        let element = match parameter(entry)? {
            DIMENSIONS => MessageElement::numeric(RETURN, self.memory.dimensions()?),
            DIM_COUNT => MessageElement::scalar(RETURN, self.memory.dim_count()? as u64),
            MAX_TRANSFER_SIZE => MessageElement::scalar(RETURN, self.max_transfer_size),
            other => return Err(unknown_parameter(&self.name, other)),
        };
        let mut response = entry.response()?;
        response.push(element);
        Ok(response)
    }
}

impl<C: SliceCodec> MemberHandler for MultiDimArrayMemoryServer<C> {
    fn handle_request(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) -> Result<MessageEntry> {
        debug!(member = %self.name, endpoint = endpoint.local_id(), kind = ?entry.entry_type, "memory request");
        match entry.entry_type {
            EntryType::MemoryReadReq => self.read(&entry),
            EntryType::MemoryWriteReq => self.write(&entry),
            EntryType::MemoryGetParamReq => self.get_param(&entry),
            other => Err(MemberError::InvalidOperation(format!(
                "memory '{}' does not accept {other:?}",
                self.name
            ))),
        }
    }
}
