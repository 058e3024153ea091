//! The wire-value tree.
//!
//! Every value crossing a member boundary is a [`MessageElement`]: a name (or
//! dense index) plus one [`ElementData`] node. Nested nodes are
//! [`ElementList`]s that carry a data type tag and a type name so unpacking can
//! verify it is reading what the packer wrote.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};
use crate::numeric::{NumericArray, NumericElement};
use crate::types::DataType;

/// How an element is addressed inside its parent list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementName {
    /// Dense integer index (array-of-record and map encodings).
    Number(i32),
    /// Field or member name.
    Name(String),
}

impl ElementName {
    /// The integer index of this element.
    ///
    /// A string name that parses as an integer is accepted, so callers do not
    /// need to know which addressing mode the packer used.
    pub fn number(&self) -> Result<i32> {
        match self {
            ElementName::Number(n) => Ok(*n),
            ElementName::Name(name) => name.trim().parse::<i32>().map_err(|_| {
                ValueError::DataType(format!("element name '{name}' is not a number"))
            }),
        }
    }

    /// Returns true when this is a string name equal to `name`.
    pub fn is(&self, name: &str) -> bool {
        matches!(self, ElementName::Name(n) if n == name)
    }
}

impl fmt::Display for ElementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementName::Number(n) => write!(f, "{n}"),
            ElementName::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for ElementName {
    fn from(value: &str) -> Self {
        ElementName::Name(value.to_string())
    }
}

impl From<String> for ElementName {
    fn from(value: String) -> Self {
        ElementName::Name(value)
    }
}

impl From<i32> for ElementName {
    fn from(value: i32) -> Self {
        ElementName::Number(value)
    }
}

/// Payload of a tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementData {
    Void,
    Numeric(NumericArray),
    String(String),
    List(ElementList),
}

impl ElementData {
    /// Wire tag of this node.
    pub fn data_type(&self) -> DataType {
        match self {
            ElementData::Void => DataType::Void,
            ElementData::Numeric(array) => array.data_type(),
            ElementData::String(_) => DataType::String,
            ElementData::List(list) => list.data_type,
        }
    }

    /// Type name for nested lists.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ElementData::List(list) => Some(&list.type_name),
            _ => None,
        }
    }

    /// Element count as written on the wire.
    pub fn count(&self) -> usize {
        match self {
            ElementData::Void => 0,
            ElementData::Numeric(array) => array.len(),
            ElementData::String(text) => text.len(),
            ElementData::List(list) => list.elements.len(),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, ElementData::Void)
    }

    /// Borrow as a numeric array.
    pub fn as_numeric(&self) -> Result<&NumericArray> {
        match self {
            ElementData::Numeric(array) => Ok(array),
            other => Err(ValueError::DataType(format!(
                "expected numeric array, found {}",
                other.data_type()
            ))),
        }
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            ElementData::String(text) => Ok(text),
            other => Err(ValueError::DataType(format!(
                "expected string, found {}",
                other.data_type()
            ))),
        }
    }

    /// Borrow as a nested list.
    pub fn as_list(&self) -> Result<&ElementList> {
        match self {
            ElementData::List(list) => Ok(list),
            other => Err(ValueError::DataType(format!(
                "expected element list, found {}",
                other.data_type()
            ))),
        }
    }

    /// Borrow as a typed numeric slice.
    pub fn as_slice<T: NumericElement>(&self) -> Result<&[T]> {
        self.as_numeric()?.as_slice::<T>()
    }

    /// Read a single numeric value; the array must hold exactly one element.
    pub fn as_scalar<T: NumericElement>(&self) -> Result<T> {
        match self.as_slice::<T>()? {
            [value] => Ok(*value),
            other => Err(ValueError::DataType(format!(
                "expected scalar {}, found array of length {}",
                T::DATA_TYPE,
                other.len()
            ))),
        }
    }
}

impl From<NumericArray> for ElementData {
    fn from(value: NumericArray) -> Self {
        ElementData::Numeric(value)
    }
}

impl From<ElementList> for ElementData {
    fn from(value: ElementList) -> Self {
        ElementData::List(value)
    }
}

/// One named-or-numbered node of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageElement {
    pub name: ElementName,
    pub data: ElementData,
}

impl MessageElement {
    pub fn new(name: impl Into<ElementName>, data: impl Into<ElementData>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Element holding a numeric array.
    pub fn numeric<T: NumericElement>(name: impl Into<ElementName>, values: Vec<T>) -> Self {
        Self::new(name, NumericArray::from_vec(values))
    }

    /// Element holding a single numeric value.
    pub fn scalar<T: NumericElement>(name: impl Into<ElementName>, value: T) -> Self {
        Self::numeric(name, vec![value])
    }

    /// Element holding a string.
    pub fn string(name: impl Into<ElementName>, value: impl Into<String>) -> Self {
        Self::new(name, ElementData::String(value.into()))
    }

    /// Element with no payload.
    pub fn void(name: impl Into<ElementName>) -> Self {
        Self::new(name, ElementData::Void)
    }

    /// Integer index of this element (see [`ElementName::number`]).
    pub fn element_number(&self) -> Result<i32> {
        self.name.number()
    }
}

/// A typed, named list of nested elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementList {
    pub data_type: DataType,
    pub type_name: String,
    pub elements: Vec<MessageElement>,
}

impl ElementList {
    pub fn new(
        data_type: DataType,
        type_name: impl Into<String>,
        elements: Vec<MessageElement>,
    ) -> Self {
        Self {
            data_type,
            type_name: type_name.into(),
            elements,
        }
    }

    /// Find a required element by name.
    pub fn find(&self, name: &str) -> Result<&MessageElement> {
        find_element(&self.elements, name)
    }

    /// Find an optional element by name.
    pub fn try_find(&self, name: &str) -> Option<&MessageElement> {
        self.elements.iter().find(|e| e.name.is(name))
    }

    /// Fail unless the list was written with the given tag and type name.
    pub fn expect_type(&self, data_type: DataType, type_name: &str) -> Result<()> {
        if self.data_type != data_type {
            return Err(ValueError::DataType(format!(
                "expected {data_type} '{type_name}', found {} '{}'",
                self.data_type, self.type_name
            )));
        }
        if self.type_name != type_name {
            return Err(ValueError::DataType(format!(
                "type name mismatch: expected '{type_name}', found '{}'",
                self.type_name
            )));
        }
        Ok(())
    }

    /// Verify that elements are numbered `0..N-1` with no gaps.
    pub fn check_indexed(&self) -> Result<()> {
        for (i, element) in self.elements.iter().enumerate() {
            let number = element
                .element_number()
                .map_err(|_| ValueError::list_format())?;
            if usize::try_from(number).ok() != Some(i) {
                return Err(ValueError::list_format());
            }
        }
        Ok(())
    }
}

/// Find a required element by name in a flat element sequence.
pub fn find_element<'a>(elements: &'a [MessageElement], name: &str) -> Result<&'a MessageElement> {
    elements
        .iter()
        .find(|e| e.name.is(name))
        .ok_or_else(|| ValueError::NotFound(format!("element '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_number_accepts_numeric_string_names() {
        assert_eq!(ElementName::Number(4).number().unwrap(), 4);
        assert_eq!(ElementName::from("12").number().unwrap(), 12);
        assert!(ElementName::from("x").number().is_err());
    }

    #[test]
    fn find_reports_not_found() {
        let list = ElementList::new(
            DataType::Structure,
            "example.Point",
            vec![MessageElement::scalar("x", 1.0f64)],
        );
        assert!(list.find("x").is_ok());
        assert!(matches!(list.find("y"), Err(ValueError::NotFound(_))));
        assert!(list.try_find("y").is_none());
    }

    #[test]
    fn type_name_mismatch_is_data_type_error() {
        let list = ElementList::new(DataType::Structure, "example.A", Vec::new());
        assert!(list.expect_type(DataType::Structure, "example.A").is_ok());
        assert!(matches!(
            list.expect_type(DataType::Structure, "example.B"),
            Err(ValueError::DataType(_))
        ));
        assert!(matches!(
            list.expect_type(DataType::Pod, "example.A"),
            Err(ValueError::DataType(_))
        ));
    }

    #[test]
    fn indexed_lists_must_be_contiguous() {
        let good = ElementList::new(
            DataType::List,
            "t",
            vec![
                MessageElement::scalar(0, 1i32),
                MessageElement::scalar("1", 2i32),
            ],
        );
        assert!(good.check_indexed().is_ok());

        let gap = ElementList::new(
            DataType::List,
            "t",
            vec![MessageElement::scalar(0, 1i32), MessageElement::scalar(2, 2i32)],
        );
        let err = gap.check_indexed().unwrap_err();
        assert_eq!(err.to_string(), "data type error: Error in list format");
    }

    #[test]
    fn scalar_access_requires_single_element() {
        let one = ElementData::from(NumericArray::from_vec(vec![5u16]));
        assert_eq!(one.as_scalar::<u16>().unwrap(), 5);

        let two = ElementData::from(NumericArray::from_vec(vec![5u16, 6]));
        assert!(two.as_scalar::<u16>().is_err());
        assert!(two.as_str().is_err());
    }
}
