//! Sample records, one per family.

use raconteur_value::{ElementList, MessageElement, Result};

use crate::field;
use crate::record::{
    AStructureKind, FieldRecord, FlatRecord, NamedArrayKind, PodKind, Record, StructureKind,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub name: String,
    pub reading: f64,
    pub samples: Vec<i32>,
}

impl Record for Sensor {
    type Kind = StructureKind;
    const TYPE_NAME: &'static str = "example.instruments.Sensor";
}

impl FieldRecord for Sensor {
    fn pack_fields(&self) -> Result<Vec<MessageElement>> {
        Ok(vec![
            MessageElement::string("name", self.name.as_str()),
            MessageElement::scalar("reading", self.reading),
            MessageElement::numeric("samples", self.samples.clone()),
        ])
    }

    fn unpack_fields(list: &ElementList) -> Result<Self> {
        Ok(Self {
            name: field::string(list, "name")?,
            reading: field::scalar(list, "reading")?,
            samples: field::array(list, "samples")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub id: u32,
    pub values: [f32; 3],
}

impl Sample {
    pub fn numbered(n: u32) -> Self {
        Self {
            id: n,
            values: [n as f32, n as f32 * 0.5, -(n as f32)],
        }
    }
}

impl Record for Sample {
    type Kind = PodKind;
    const TYPE_NAME: &'static str = "example.instruments.Sample";
}

impl FieldRecord for Sample {
    fn pack_fields(&self) -> Result<Vec<MessageElement>> {
        Ok(vec![
            MessageElement::scalar("id", self.id),
            MessageElement::numeric("values", self.values.to_vec()),
        ])
    }

    fn unpack_fields(list: &ElementList) -> Result<Self> {
        Ok(Self {
            id: field::scalar(list, "id")?,
            values: field::fixed_array(list, "values")?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Record for Vector3 {
    type Kind = NamedArrayKind;
    const TYPE_NAME: &'static str = "example.geometry.Vector3";
}

impl FlatRecord for Vector3 {
    type Element = f64;
    const ELEMENT_COUNT: usize = 3;

    fn flatten(&self, out: &mut Vec<f64>) {
        out.extend_from_slice(&[self.x, self.y, self.z]);
    }

    fn restore(values: &[f64]) -> Self {
        Self::new(values[0], values[1], values[2])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn translated(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: [x, y, z],
            ..Self::identity()
        }
    }
}

impl Record for Pose {
    type Kind = AStructureKind;
    const TYPE_NAME: &'static str = "example.geometry.Pose";
}

impl FlatRecord for Pose {
    type Element = f64;
    const ELEMENT_COUNT: usize = 7;

    fn flatten(&self, out: &mut Vec<f64>) {
        out.extend_from_slice(&self.position);
        out.extend_from_slice(&self.orientation);
    }

    fn restore(values: &[f64]) -> Self {
        let mut pose = Self::default();
        pose.position.copy_from_slice(&values[..3]);
        pose.orientation.copy_from_slice(&values[3..7]);
        pose
    }
}
