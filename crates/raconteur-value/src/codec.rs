use bytes::{Buf, BufMut, BytesMut};

use crate::element::{ElementData, ElementList, ElementName, MessageElement};
use crate::entry::{EntryType, ErrorInfo, MessageEntry};
use crate::error::{Result, ValueError};
use crate::numeric::NumericArray;
use crate::types::DataType;

/// Message header: magic (2) + body length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "RR" (0x52 0x52).
pub const MAGIC: [u8; 2] = [0x52, 0x52];

/// Default maximum message body size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Deepest element nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// Element flag: name is a UTF-8 string.
pub const FLAG_NAME_STR: u8 = 0x01;
/// Element flag: name is an `i32` number.
pub const FLAG_NAME_NUMBER: u8 = 0x02;
/// Element flag: a type name follows the type tag.
pub const FLAG_TYPE_NAME: u8 = 0x04;

/// Configuration for the message codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum message body size in bytes. Default: 16 MiB.
    pub max_message_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
        }
    }
}

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬────────────────────────────────────────────┐
/// │ Magic (2B)   │ Length    │ Body                                       │
/// │ 0x52 0x52    │ (4B LE)   │ type u16 | request id u64 | member str     │
/// │ "RR"         │           │ error? | element count u32 | elements...   │
/// └──────────────┴───────────┴────────────────────────────────────────────┘
/// ```
///
/// Each element is `size u32 | flags u8 | name | tag u16 | type name? |
/// count u32 | payload`, where `size` covers the whole element.
pub fn encode_message(entry: &MessageEntry, dst: &mut BytesMut) -> Result<()> {
    let start = dst.len();
    dst.put_slice(&MAGIC);
    dst.put_u32_le(0);

    dst.put_u16_le(entry.entry_type.tag());
    dst.put_u64_le(entry.request_id);
    put_str(&entry.member_name, dst)?;
    match &entry.error {
        None => dst.put_u8(0),
        Some(error) => {
            dst.put_u8(1);
            put_error(error, dst)?;
        }
    }
    put_len(entry.elements.len(), dst)?;
    for element in &entry.elements {
        encode_element(element, dst)?;
    }

    let body = dst.len() - start - HEADER_SIZE;
    let body = u32::try_from(body).map_err(|_| ValueError::PayloadTooLarge {
        size: body,
        max: u32::MAX as usize,
    })?;
    dst[start + 2..start + HEADER_SIZE].copy_from_slice(&body.to_le_bytes());
    Ok(())
}

/// Decode a message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_message: usize) -> Result<Option<MessageEntry>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(ValueError::InvalidMagic);
    }

    let body_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if body_len > max_message {
        return Err(ValueError::PayloadTooLarge {
            size: body_len,
            max: max_message,
        });
    }

    if src.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();
    let mut cursor = &body[..];
    let entry = decode_body(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(ValueError::DataType(format!(
            "{} trailing bytes after message body",
            cursor.len()
        )));
    }
    Ok(Some(entry))
}

/// Encode one element, including nested lists.
pub fn encode_element(element: &MessageElement, dst: &mut BytesMut) -> Result<()> {
    let start = dst.len();
    dst.put_u32_le(0);

    let type_name = element.data.type_name();
    let mut flags = match element.name {
        ElementName::Name(_) => FLAG_NAME_STR,
        ElementName::Number(_) => FLAG_NAME_NUMBER,
    };
    if type_name.is_some() {
        flags |= FLAG_TYPE_NAME;
    }
    dst.put_u8(flags);
    match &element.name {
        ElementName::Name(name) => put_str(name, dst)?,
        ElementName::Number(n) => dst.put_i32_le(*n),
    }
    dst.put_u16_le(element.data.data_type().tag());
    if let Some(type_name) = type_name {
        put_str(type_name, dst)?;
    }
    put_len(element.data.count(), dst)?;

    match &element.data {
        ElementData::Void => {}
        ElementData::Numeric(array) => array.write_le(dst),
        ElementData::String(text) => dst.put_slice(text.as_bytes()),
        ElementData::List(list) => {
            for child in &list.elements {
                encode_element(child, dst)?;
            }
        }
    }

    let size = dst.len() - start;
    let size = u32::try_from(size).map_err(|_| ValueError::PayloadTooLarge {
        size,
        max: u32::MAX as usize,
    })?;
    dst[start..start + 4].copy_from_slice(&size.to_le_bytes());
    Ok(())
}

/// Decode one element, advancing `src` past it.
pub fn decode_element(src: &mut &[u8]) -> Result<MessageElement> {
    decode_element_at(src, 0)
}

fn decode_element_at(src: &mut &[u8], depth: usize) -> Result<MessageElement> {
    if depth > MAX_DEPTH {
        return Err(ValueError::DataType(format!(
            "element nesting exceeds {MAX_DEPTH} levels"
        )));
    }

    let size = get_u32(src, "element size")? as usize;
    let body_len = size
        .checked_sub(4)
        .filter(|&n| n <= src.len())
        .ok_or_else(|| {
            ValueError::Truncated(format!(
                "element declares {size} bytes, {} available",
                src.len() + 4
            ))
        })?;
    let (mut body, rest) = src.split_at(body_len);
    *src = rest;

    let flags = get_u8(&mut body, "element flags")?;
    let name = if flags & FLAG_NAME_STR != 0 {
        ElementName::Name(get_str(&mut body, "element name")?)
    } else if flags & FLAG_NAME_NUMBER != 0 {
        ElementName::Number(get_i32(&mut body, "element number")?)
    } else {
        return Err(ValueError::DataType(format!(
            "element flags {flags:#04x} carry no name"
        )));
    };
    let data_type = DataType::from_tag(get_u16(&mut body, "type tag")?)?;
    let type_name = if flags & FLAG_TYPE_NAME != 0 {
        Some(get_str(&mut body, "type name")?)
    } else {
        None
    };
    let count = get_u32(&mut body, "element count")? as usize;

    let data = match data_type {
        DataType::Void => ElementData::Void,
        DataType::String => {
            let bytes = take(&mut body, count, "string payload")?;
            let text = std::str::from_utf8(bytes).map_err(|e| {
                ValueError::DataType(format!("element '{name}' is not valid UTF-8: {e}"))
            })?;
            ElementData::String(text.to_string())
        }
        t if t.is_numeric() => ElementData::Numeric(NumericArray::read_le(t, count, &mut body)?),
        t => {
            let mut elements = Vec::with_capacity(count.min(body.len() / 4));
            for _ in 0..count {
                elements.push(decode_element_at(&mut body, depth + 1)?);
            }
            ElementData::List(ElementList::new(t, type_name.unwrap_or_default(), elements))
        }
    };

    if !body.is_empty() {
        return Err(ValueError::DataType(format!(
            "element '{name}' has {} unread bytes",
            body.len()
        )));
    }
    Ok(MessageElement { name, data })
}

fn decode_body(src: &mut &[u8]) -> Result<MessageEntry> {
    let entry_type = EntryType::from_tag(get_u16(src, "entry type")?)?;
    let request_id = get_u64(src, "request id")?;
    let member_name = get_str(src, "member name")?;
    let error = match get_u8(src, "error flag")? {
        0 => None,
        _ => Some(get_error(src)?),
    };
    let count = get_u32(src, "element count")? as usize;
    let mut elements = Vec::with_capacity(count.min(src.len() / 4));
    for _ in 0..count {
        elements.push(decode_element(src)?);
    }
    Ok(MessageEntry {
        entry_type,
        member_name,
        request_id,
        error,
        elements,
    })
}

fn put_error(error: &ErrorInfo, dst: &mut BytesMut) -> Result<()> {
    dst.put_i32_le(error.code);
    put_str(&error.name, dst)?;
    put_str(&error.message, dst)?;
    match &error.sub_name {
        None => dst.put_u8(0),
        Some(sub_name) => {
            dst.put_u8(1);
            put_str(sub_name, dst)?;
        }
    }
    match &error.param {
        None => dst.put_u8(0),
        Some(param) => {
            dst.put_u8(1);
            encode_element(param, dst)?;
        }
    }
    Ok(())
}

fn get_error(src: &mut &[u8]) -> Result<ErrorInfo> {
    let code = get_i32(src, "error code")?;
    let name = get_str(src, "error name")?;
    let message = get_str(src, "error message")?;
    let sub_name = match get_u8(src, "error sub name flag")? {
        0 => None,
        _ => Some(get_str(src, "error sub name")?),
    };
    let param = match get_u8(src, "error param flag")? {
        0 => None,
        _ => Some(decode_element(src)?),
    };
    Ok(ErrorInfo {
        code,
        name,
        message,
        sub_name,
        param,
    })
}

fn put_len(len: usize, dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| ValueError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    dst.put_u32_le(len);
    Ok(())
}

fn put_str(text: &str, dst: &mut BytesMut) -> Result<()> {
    put_len(text.len(), dst)?;
    dst.put_slice(text.as_bytes());
    Ok(())
}

fn take<'a>(src: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if src.len() < n {
        return Err(ValueError::Truncated(format!(
            "{what} needs {n} bytes, {} available",
            src.len()
        )));
    }
    let (head, rest) = src.split_at(n);
    *src = rest;
    Ok(head)
}

fn get_u8(src: &mut &[u8], what: &str) -> Result<u8> {
    Ok(take(src, 1, what)?[0])
}

fn get_u16(src: &mut &[u8], what: &str) -> Result<u16> {
    let mut bytes = take(src, 2, what)?;
    Ok(bytes.get_u16_le())
}

fn get_u32(src: &mut &[u8], what: &str) -> Result<u32> {
    let mut bytes = take(src, 4, what)?;
    Ok(bytes.get_u32_le())
}

fn get_u64(src: &mut &[u8], what: &str) -> Result<u64> {
    let mut bytes = take(src, 8, what)?;
    Ok(bytes.get_u64_le())
}

fn get_i32(src: &mut &[u8], what: &str) -> Result<i32> {
    let mut bytes = take(src, 4, what)?;
    Ok(bytes.get_i32_le())
}

fn get_str(src: &mut &[u8], what: &str) -> Result<String> {
    let len = get_u32(src, what)? as usize;
    let bytes = take(src, len, what)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ValueError::DataType(format!("{what} is not valid UTF-8: {e}")))
}

/// `tokio_util` codec for framed async streams of [`MessageEntry`].
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    config: CodecConfig,
}

#[cfg(feature = "async")]
impl MessageCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for MessageCodec {
    type Item = MessageEntry;
    type Error = ValueError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<MessageEntry>> {
        decode_message(src, self.config.max_message_size)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<MessageEntry> for MessageCodec {
    type Error = ValueError;

    fn encode(&mut self, item: MessageEntry, dst: &mut BytesMut) -> Result<()> {
        tokio_util::codec::Encoder::<&MessageEntry>::encode(self, &item, dst)
    }
}

#[cfg(feature = "async")]
impl<'a> tokio_util::codec::Encoder<&'a MessageEntry> for MessageCodec {
    type Error = ValueError;

    fn encode(&mut self, item: &'a MessageEntry, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        encode_message(item, dst)?;
        let body = dst.len() - start - HEADER_SIZE;
        if body > self.config.max_message_size {
            dst.truncate(start);
            return Err(ValueError::PayloadTooLarge {
                size: body,
                max: self.config.max_message_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::CDouble;

    fn sample_entry() -> MessageEntry {
        let point = ElementList::new(
            DataType::Structure,
            "example.geometry.Point",
            vec![
                MessageElement::scalar("x", 1.5f64),
                MessageElement::scalar("y", -2.0f64),
                MessageElement::string("label", "origin"),
            ],
        );
        let mut entry = MessageEntry::new(EntryType::WirePacket, "position")
            .with_element(MessageElement::new("value", point))
            .with_element(MessageElement::numeric(
                "ts",
                vec![CDouble::new(0.5, 1.0)],
            ))
            .with_element(MessageElement::void("marker"))
            .with_element(MessageElement::numeric(7, vec![u64::MAX, 0]));
        entry.request_id = 99;
        entry
    }

    #[test]
    fn encode_decode_roundtrip() {
        let entry = sample_entry();
        let mut buf = BytesMut::new();
        encode_message(&entry, &mut buf).unwrap();

        let decoded = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, entry);
        assert!(buf.is_empty());
    }

    #[test]
    fn error_info_survives_encoding() {
        let mut error = ErrorInfo::new(3, "OperationAborted", "generator aborted");
        error.sub_name = Some("stage".to_string());
        error.param = Some(MessageElement::scalar("attempt", 2i32));
        let entry = MessageEntry::new(EntryType::GeneratorNextReq, "gen")
            .error_response(error.clone())
            .unwrap();

        let mut buf = BytesMut::new();
        encode_message(&entry, &mut buf).unwrap();
        let decoded = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.error, Some(error));
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x52, 0x52, 0x00][..]);
        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_message(&sample_entry(), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 5);
        assert!(decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0x49, 0x50, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            decode_message(&mut buf, DEFAULT_MAX_MESSAGE),
            Err(ValueError::InvalidMagic)
        ));
    }

    #[test]
    fn decode_message_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024 * 1024 * 32);
        assert!(matches!(
            decode_message(&mut buf, DEFAULT_MAX_MESSAGE),
            Err(ValueError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn multiple_messages_in_one_buffer() {
        let first = MessageEntry::new(EntryType::PipePacket, "a");
        let second = MessageEntry::new(EntryType::PipeClosed, "b");
        let mut buf = BytesMut::new();
        encode_message(&first, &mut buf).unwrap();
        encode_message(&second, &mut buf).unwrap();

        let m1 = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        let m2 = decode_message(&mut buf, DEFAULT_MAX_MESSAGE).unwrap().unwrap();
        assert_eq!(m1, first);
        assert_eq!(m2, second);
        assert!(buf.is_empty());
    }

    #[test]
    fn element_size_covers_whole_element() {
        let element = MessageElement::numeric("v", vec![1i16, 2, 3]);
        let mut buf = BytesMut::new();
        encode_element(&element, &mut buf).unwrap();
        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(declared, buf.len());

        let mut src = &buf[..];
        assert_eq!(decode_element(&mut src).unwrap(), element);
        assert!(src.is_empty());
    }

    #[test]
    fn truncated_element_rejected() {
        let mut buf = BytesMut::new();
        encode_element(&MessageElement::numeric("v", vec![1u32; 4]), &mut buf).unwrap();
        let mut src = &buf[..buf.len() - 3];
        assert!(matches!(
            decode_element(&mut src),
            Err(ValueError::Truncated(_))
        ));
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let mut buf = BytesMut::new();
        encode_element(&MessageElement::void("v"), &mut buf).unwrap();
        // size(4) + flags(1) + name len(4) + "v"(1) puts the tag at offset 10.
        buf[10] = 0xEE;
        buf[11] = 0x00;
        let mut src = &buf[..];
        assert!(matches!(
            decode_element(&mut src),
            Err(ValueError::InvalidTypeTag(0xEE))
        ));
    }

    #[test]
    fn excessive_nesting_rejected() {
        let mut element = MessageElement::void("leaf");
        for _ in 0..=MAX_DEPTH {
            element = MessageElement::new(
                "n",
                ElementList::new(DataType::List, "nested", vec![element]),
            );
        }
        let mut buf = BytesMut::new();
        encode_element(&element, &mut buf).unwrap();
        let mut src = &buf[..];
        assert!(matches!(
            decode_element(&mut src),
            Err(ValueError::DataType(_))
        ));
    }

    #[test]
    fn empty_message() {
        let entry = MessageEntry::new(EntryType::WireClosed, "");
        let mut buf = BytesMut::new();
        encode_message(&entry, &mut buf).unwrap();
        let decoded = decode_message(&mut buf, DEFAULT_MAX_MESSAGE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, entry);
    }
}
