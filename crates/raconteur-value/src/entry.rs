//! Message envelope exchanged between endpoints.
//!
//! A [`MessageEntry`] addresses one member by name and carries a request id
//! used to match responses, an optional [`ErrorInfo`] and the element payload.

use serde::{Deserialize, Serialize};

use crate::element::{find_element, MessageElement};
use crate::error::{Result, ValueError};

/// Kind of a message entry.
///
/// Request kinds pair with a response kind whose tag is one higher.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    PipeConnectReq = 1001,
    PipeConnectRet = 1002,
    PipeDisconnectReq = 1003,
    PipeDisconnectRet = 1004,
    WireConnectReq = 1011,
    WireConnectRet = 1012,
    WireDisconnectReq = 1013,
    WireDisconnectRet = 1014,
    WirePeekInValueReq = 1015,
    WirePeekInValueRet = 1016,
    WirePeekOutValueReq = 1017,
    WirePeekOutValueRet = 1018,
    WirePokeOutValueReq = 1019,
    WirePokeOutValueRet = 1020,
    GeneratorNextReq = 1031,
    GeneratorNextRet = 1032,
    GeneratorAbortReq = 1033,
    GeneratorAbortRet = 1034,
    GeneratorCloseReq = 1035,
    GeneratorCloseRet = 1036,
    MemoryReadReq = 1041,
    MemoryReadRet = 1042,
    MemoryWriteReq = 1043,
    MemoryWriteRet = 1044,
    MemoryGetParamReq = 1045,
    MemoryGetParamRet = 1046,
    PipePacket = 1101,
    PipePacketRet = 1102,
    PipeClosed = 1103,
    WirePacket = 1111,
    WireClosed = 1112,
}

const ALL: [EntryType; 31] = [
    EntryType::PipeConnectReq,
    EntryType::PipeConnectRet,
    EntryType::PipeDisconnectReq,
    EntryType::PipeDisconnectRet,
    EntryType::WireConnectReq,
    EntryType::WireConnectRet,
    EntryType::WireDisconnectReq,
    EntryType::WireDisconnectRet,
    EntryType::WirePeekInValueReq,
    EntryType::WirePeekInValueRet,
    EntryType::WirePeekOutValueReq,
    EntryType::WirePeekOutValueRet,
    EntryType::WirePokeOutValueReq,
    EntryType::WirePokeOutValueRet,
    EntryType::GeneratorNextReq,
    EntryType::GeneratorNextRet,
    EntryType::GeneratorAbortReq,
    EntryType::GeneratorAbortRet,
    EntryType::GeneratorCloseReq,
    EntryType::GeneratorCloseRet,
    EntryType::MemoryReadReq,
    EntryType::MemoryReadRet,
    EntryType::MemoryWriteReq,
    EntryType::MemoryWriteRet,
    EntryType::MemoryGetParamReq,
    EntryType::MemoryGetParamRet,
    EntryType::PipePacket,
    EntryType::PipePacketRet,
    EntryType::PipeClosed,
    EntryType::WirePacket,
    EntryType::WireClosed,
];

impl EntryType {
    pub fn tag(self) -> u16 {
        self as u16
    }

    pub fn from_tag(tag: u16) -> Result<Self> {
        ALL.iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or_else(|| ValueError::DataType(format!("unknown message entry type {tag}")))
    }

    /// Returns true for kinds that expect a response.
    pub fn is_request(self) -> bool {
        self.tag() < 1100 && self.tag() % 2 == 1
    }

    /// Returns true for response kinds.
    pub fn is_response(self) -> bool {
        self.tag() < 1100 && self.tag() % 2 == 0
    }

    /// Response kind paired with this request kind.
    pub fn response(self) -> Option<Self> {
        if self.is_request() {
            Self::from_tag(self.tag() + 1).ok()
        } else {
            None
        }
    }
}

/// Serializable error record carried in a response entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Numeric error class, stable across the link.
    pub code: i32,
    /// Qualified error name.
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<MessageElement>,
}

impl ErrorInfo {
    pub fn new(code: i32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            message: message.into(),
            sub_name: None,
            param: None,
        }
    }
}

/// One addressed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub entry_type: EntryType,
    pub member_name: String,
    /// Zero for one-way entries.
    #[serde(default)]
    pub request_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub elements: Vec<MessageElement>,
}

impl MessageEntry {
    pub fn new(entry_type: EntryType, member_name: impl Into<String>) -> Self {
        Self {
            entry_type,
            member_name: member_name.into(),
            request_id: 0,
            error: None,
            elements: Vec::new(),
        }
    }

    /// Append an element, builder style.
    pub fn with_element(mut self, element: MessageElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn push(&mut self, element: MessageElement) {
        self.elements.push(element);
    }

    /// Find a required element by name.
    pub fn find(&self, name: &str) -> Result<&MessageElement> {
        find_element(&self.elements, name)
    }

    pub fn try_find(&self, name: &str) -> Option<&MessageElement> {
        self.elements.iter().find(|e| e.name.is(name))
    }

    /// Remove and return a required element by name.
    pub fn take(&mut self, name: &str) -> Result<MessageElement> {
        let index = self
            .elements
            .iter()
            .position(|e| e.name.is(name))
            .ok_or_else(|| ValueError::NotFound(format!("element '{name}'")))?;
        Ok(self.elements.remove(index))
    }

    /// Empty response matching this request's member and id.
    pub fn response(&self) -> Result<MessageEntry> {
        let entry_type = self.entry_type.response().ok_or_else(|| {
            ValueError::DataType(format!("{:?} does not take a response", self.entry_type))
        })?;
        Ok(MessageEntry {
            entry_type,
            member_name: self.member_name.clone(),
            request_id: self.request_id,
            error: None,
            elements: Vec::new(),
        })
    }

    /// Response carrying an error instead of a payload.
    pub fn error_response(&self, error: ErrorInfo) -> Result<MessageEntry> {
        let mut response = self.response()?;
        response.error = Some(error);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_tag_resolves() {
        for t in ALL {
            assert_eq!(EntryType::from_tag(t.tag()).unwrap(), t);
        }
        assert!(EntryType::from_tag(7).is_err());
    }

    #[test]
    fn requests_pair_with_responses() {
        assert_eq!(
            EntryType::GeneratorNextReq.response(),
            Some(EntryType::GeneratorNextRet)
        );
        assert_eq!(
            EntryType::MemoryGetParamReq.response(),
            Some(EntryType::MemoryGetParamRet)
        );
        assert!(EntryType::GeneratorNextRet.is_response());
        assert_eq!(EntryType::PipePacket.response(), None);
        assert!(!EntryType::WireClosed.is_request());
        assert!(!EntryType::WireClosed.is_response());
    }

    #[test]
    fn response_keeps_member_and_request_id() {
        let mut request = MessageEntry::new(EntryType::WirePeekInValueReq, "sensor");
        request.request_id = 42;
        let response = request.response().unwrap();
        assert_eq!(response.entry_type, EntryType::WirePeekInValueRet);
        assert_eq!(response.member_name, "sensor");
        assert_eq!(response.request_id, 42);

        let failed = request
            .error_response(ErrorInfo::new(4, "ValueNotSet", "no value"))
            .unwrap();
        assert_eq!(failed.error.unwrap().name, "ValueNotSet");

        let oneway = MessageEntry::new(EntryType::PipePacket, "p");
        assert!(oneway.response().is_err());
    }

    #[test]
    fn take_removes_element() {
        let mut entry = MessageEntry::new(EntryType::PipePacket, "p")
            .with_element(MessageElement::scalar("index", 1i32))
            .with_element(MessageElement::scalar("packetnumber", 9u32));
        let index = entry.take("index").unwrap();
        assert_eq!(index.data.as_scalar::<i32>().unwrap(), 1);
        assert!(entry.try_find("index").is_none());
        assert!(matches!(entry.take("index"), Err(ValueError::NotFound(_))));
        assert_eq!(entry.elements.len(), 1);
    }
}
