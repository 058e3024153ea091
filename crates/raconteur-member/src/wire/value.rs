use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use raconteur_stub::Codec;
use raconteur_value::{MessageElement, MessageEntry};

use super::{PACKET, TS_NANOS, TS_SECONDS};
use crate::error::{MemberError, Result};

/// Sender clock time attached to every wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WireTimestamp {
    pub seconds: i64,
    pub nanoseconds: i32,
}

impl WireTimestamp {
    pub fn new(seconds: i64, nanoseconds: i32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => Self::new(
                i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
                since.subsec_nanos() as i32,
            ),
            Err(before) => {
                let before = before.duration();
                Self::new(-(before.as_secs() as i64), -(before.subsec_nanos() as i32))
            }
        }
    }
}

/// A value with the timestamp it was sent with.
#[derive(Debug, Clone, PartialEq)]
pub struct WireValue<V> {
    pub value: V,
    pub timestamp: WireTimestamp,
}

impl<V> WireValue<V> {
    pub fn new(value: V, timestamp: WireTimestamp) -> Self {
        Self { value, timestamp }
    }

    /// Stamp `value` with the current time.
    pub fn now(value: V) -> Self {
        Self::new(value, WireTimestamp::now())
    }
}

pub(crate) fn push_value<C: Codec>(entry: &mut MessageEntry, value: &WireValue<C::Value>) -> Result<()> {
    entry.push(MessageElement::new(PACKET, C::pack(&value.value)?));
    entry.push(MessageElement::scalar(TS_SECONDS, value.timestamp.seconds));
    entry.push(MessageElement::scalar(TS_NANOS, value.timestamp.nanoseconds));
    Ok(())
}

pub(crate) fn read_value<C: Codec>(entry: &MessageEntry) -> Result<WireValue<C::Value>> {
    let value = C::unpack(&entry.find(PACKET)?.data)?;
    let timestamp = WireTimestamp::new(
        entry.find(TS_SECONDS)?.data.as_scalar::<i64>()?,
        entry.find(TS_NANOS)?.data.as_scalar::<i32>()?,
    );
    Ok(WireValue::new(value, timestamp))
}

/// Latest value of one direction, with validity bounded by a lifespan
/// measured from local arrival.
pub(crate) struct ValueSlot<V> {
    current: Option<(WireValue<V>, Instant)>,
    lifespan: Option<Duration>,
}

impl<V: Clone> ValueSlot<V> {
    pub(crate) fn new(lifespan: Option<Duration>) -> Self {
        Self {
            current: None,
            lifespan,
        }
    }

    pub(crate) fn lifespan(&self) -> Option<Duration> {
        self.lifespan
    }

    pub(crate) fn set_lifespan(&mut self, lifespan: Option<Duration>) {
        self.lifespan = lifespan;
    }

    /// Store `value` unless it is older than the current one. Returns true
    /// when stored.
    pub(crate) fn update(&mut self, value: WireValue<V>) -> bool {
        if let Some((current, _)) = &self.current {
            if value.timestamp < current.timestamp {
                return false;
            }
        }
        self.current = Some((value, Instant::now()));
        true
    }

    /// Store `value` regardless of its timestamp.
    pub(crate) fn replace(&mut self, value: WireValue<V>) {
        self.current = Some((value, Instant::now()));
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.current.as_ref().is_some_and(|(_, at)| match self.lifespan {
            Some(lifespan) => at.elapsed() <= lifespan,
            None => true,
        })
    }

    pub(crate) fn get(&self) -> Option<WireValue<V>> {
        if self.is_valid() {
            self.current.as_ref().map(|(value, _)| value.clone())
        } else {
            None
        }
    }

    pub(crate) fn require(&self, what: &str) -> Result<WireValue<V>> {
        self.get()
            .ok_or_else(|| MemberError::ValueNotSet(format!("{what} not set or expired")))
    }
}
