use std::collections::HashMap;

use raconteur_value::{DataType, ElementData, ElementList, MessageEntry, Result, ValueError};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::record::{Family, Record, RecordKind};

/// Wire facts recorded for one registered record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: &'static str,
    pub family: Family,
    pub scalar: DataType,
    pub array: DataType,
    pub multidim: DataType,
}

impl TypeInfo {
    /// Returns true when `tag` is one of this type's encodings.
    pub fn accepts(&self, tag: DataType) -> bool {
        tag == self.scalar || tag == self.array || tag == self.multidim
    }
}

/// Name-keyed registry of record types known to a service or client.
pub struct TypeRegistry {
    types: HashMap<&'static str, TypeInfo>,
    config: RegistryConfig,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            types: HashMap::new(),
            config,
        }
    }

    /// Register a record type. Registering the same type twice is a no-op.
    pub fn register<R: Record>(&mut self) -> Result<()> {
        let info = TypeInfo {
            name: R::TYPE_NAME,
            family: <R::Kind as RecordKind<R>>::FAMILY,
            scalar: <R::Kind as RecordKind<R>>::SCALAR,
            array: <R::Kind as RecordKind<R>>::ARRAY,
            multidim: <R::Kind as RecordKind<R>>::MULTIDIM,
        };
        if let Some(existing) = self.types.get(R::TYPE_NAME) {
            if *existing != info {
                return Err(ValueError::DataType(format!(
                    "type '{}' already registered as {}",
                    R::TYPE_NAME,
                    existing.family.name()
                )));
            }
            return Ok(());
        }
        debug!(type_name = R::TYPE_NAME, family = info.family.name(), "registered record type");
        self.types.insert(R::TYPE_NAME, info);
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeInfo> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.types.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Check every record node in `list` (recursively) against its registration.
    pub fn validate(&self, list: &ElementList) -> Result<()> {
        self.validate_at(list, 0)
    }

    /// Validate every list element of a message entry.
    pub fn validate_entry(&self, entry: &MessageEntry) -> Result<()> {
        for element in &entry.elements {
            if let ElementData::List(list) = &element.data {
                self.validate(list)?;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn validate_at(&self, list: &ElementList, depth: usize) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(ValueError::DataType(format!(
                "record nesting exceeds {} levels",
                self.config.max_depth
            )));
        }

        if is_record_tag(list.data_type) {
            match self.types.get(list.type_name.as_str()) {
                Some(info) if !info.accepts(list.data_type) => {
                    return Err(ValueError::DataType(format!(
                        "{} '{}' cannot be encoded as {}",
                        info.family.name(),
                        list.type_name,
                        list.data_type
                    )));
                }
                Some(_) => {}
                None if self.config.fail_on_unknown_type => {
                    return Err(ValueError::NotFound(format!(
                        "record type '{}'",
                        list.type_name
                    )));
                }
                None => {}
            }
        }

        for element in &list.elements {
            if let ElementData::List(child) = &element.data {
                self.validate_at(child, depth + 1)?;
            }
        }
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_record_tag(tag: DataType) -> bool {
    matches!(
        tag,
        DataType::Structure
            | DataType::Pod
            | DataType::PodArray
            | DataType::PodMultiDimArray
            | DataType::NamedArray
            | DataType::NamedArrayArray
            | DataType::NamedArrayMultiDimArray
            | DataType::AStructure
            | DataType::AStructureArray
            | DataType::AStructureMultiDimArray
    )
}

#[cfg(test)]
mod tests {
    use raconteur_value::{EntryType, MessageElement};

    use super::*;
    use crate::pack::{pack_record, pack_record_array};
    use crate::testing::{Pose, Sample, Sensor, Vector3};

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register::<Sensor>().unwrap();
        registry.register::<Sample>().unwrap();
        registry.register::<Vector3>().unwrap();
        registry
    }

    #[test]
    fn register_records_family_and_tags() {
        let registry = registry();
        let info = registry.get(Sample::TYPE_NAME).unwrap();
        assert_eq!(info.family, Family::Pod);
        assert_eq!(info.array, DataType::PodArray);
        assert_eq!(registry.type_names().len(), 3);
        assert!(!registry.contains(Pose::TYPE_NAME));
    }

    #[test]
    fn duplicate_registration_is_idempotent() {
        let mut registry = registry();
        registry.register::<Sample>().unwrap();
        assert_eq!(registry.type_names().len(), 3);
    }

    #[test]
    fn conflicting_family_rejected() {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Impostor;
        impl Record for Impostor {
            type Kind = crate::record::NamedArrayKind;
            const TYPE_NAME: &'static str = Sample::TYPE_NAME;
        }
        impl crate::record::FlatRecord for Impostor {
            type Element = u8;
            const ELEMENT_COUNT: usize = 1;
            fn flatten(&self, out: &mut Vec<u8>) {
                out.push(0);
            }
            fn restore(_: &[u8]) -> Self {
                Impostor
            }
        }

        let mut registry = registry();
        assert!(matches!(
            registry.register::<Impostor>(),
            Err(ValueError::DataType(_))
        ));
    }

    #[test]
    fn validate_accepts_registered_encodings() {
        let registry = registry();
        let list = pack_record_array(&[Sample::numbered(1), Sample::numbered(2)]).unwrap();
        registry.validate(&list).unwrap();
        registry
            .validate(&pack_record(&Vector3::new(1.0, 0.0, 0.0)).unwrap())
            .unwrap();
    }

    #[test]
    fn validate_rejects_wrong_family_tag() {
        let registry = registry();
        let mut list = pack_record(&Sample::numbered(1)).unwrap();
        list.data_type = DataType::NamedArrayArray;
        assert!(matches!(
            registry.validate(&list),
            Err(ValueError::DataType(_))
        ));
    }

    #[test]
    fn unknown_types_follow_config() {
        let pose = pack_record(&Pose::identity()).unwrap();
        assert!(registry().validate(&pose).is_ok());

        let mut strict = TypeRegistry::with_config(RegistryConfig {
            fail_on_unknown_type: true,
            ..RegistryConfig::default()
        });
        strict.register::<Sample>().unwrap();
        assert!(matches!(
            strict.validate(&pose),
            Err(ValueError::NotFound(_))
        ));
    }

    #[test]
    fn validate_entry_checks_nested_lists() {
        let mut strict = TypeRegistry::with_config(RegistryConfig {
            fail_on_unknown_type: true,
            ..RegistryConfig::default()
        });
        strict.register::<Sensor>().unwrap();

        let nested = ElementList::new(
            DataType::List,
            "wrapper",
            vec![MessageElement::new(0, pack_record(&Pose::identity()).unwrap())],
        );
        let entry = MessageEntry::new(EntryType::WirePacket, "pose")
            .with_element(MessageElement::new("value", nested));
        assert!(strict.validate_entry(&entry).is_err());
    }
}
