//! The generic pack/unpack algorithm shared by every record family.

use raconteur_value::multidim::DIMS;
use raconteur_value::{ElementList, MessageElement, MultiDimArray, Result};

use crate::record::{Record, RecordKind, ARRAY};

pub fn pack_record<R: Record>(record: &R) -> Result<ElementList> {
    <R::Kind as RecordKind<R>>::pack_scalar(record)
}

pub fn unpack_record<R: Record>(list: &ElementList) -> Result<R> {
    <R::Kind as RecordKind<R>>::unpack_scalar(list)
}

pub fn pack_record_array<R: Record>(records: &[R]) -> Result<ElementList> {
    <R::Kind as RecordKind<R>>::pack_array(records)
}

pub fn unpack_record_array<R: Record>(list: &ElementList) -> Result<Vec<R>> {
    <R::Kind as RecordKind<R>>::unpack_array(list)
}

/// Encode as `"dims"` (u32) plus `"array"` (the family's array encoding).
pub fn pack_record_multidim<R: Record>(value: &MultiDimArray<R>) -> Result<ElementList> {
    let array = <R::Kind as RecordKind<R>>::pack_array(value.array())?;
    Ok(ElementList::new(
        <R::Kind as RecordKind<R>>::MULTIDIM,
        R::TYPE_NAME,
        vec![
            MessageElement::numeric(DIMS, value.dims().to_vec()),
            MessageElement::new(ARRAY, array),
        ],
    ))
}

pub fn unpack_record_multidim<R: Record>(list: &ElementList) -> Result<MultiDimArray<R>> {
    list.expect_type(<R::Kind as RecordKind<R>>::MULTIDIM, R::TYPE_NAME)?;
    let dims = list.find(DIMS)?.data.as_slice::<u32>()?.to_vec();
    let records = unpack_record_array::<R>(list.find(ARRAY)?.data.as_list()?)?;
    MultiDimArray::new(dims, records)
}

#[cfg(test)]
mod tests {
    use raconteur_value::{DataType, ValueError};

    use super::*;
    use crate::testing::{Pose, Sample, Sensor, Vector3};

    fn sensors() -> Vec<Sensor> {
        vec![
            Sensor {
                name: "left".to_string(),
                reading: 0.5,
                samples: vec![1, 2, 3],
            },
            Sensor {
                name: "right".to_string(),
                reading: -4.25,
                samples: Vec::new(),
            },
        ]
    }

    fn samples(n: u32) -> Vec<Sample> {
        (0..n).map(Sample::numbered).collect()
    }

    #[test]
    fn structure_scalar_uses_structure_tag() {
        let sensor = sensors().remove(0);
        let list = pack_record(&sensor).unwrap();
        assert_eq!(list.data_type, DataType::Structure);
        assert_eq!(list.type_name, Sensor::TYPE_NAME);
        assert_eq!(unpack_record::<Sensor>(&list).unwrap(), sensor);
    }

    #[test]
    fn structure_array_is_indexed_list() {
        let list = pack_record_array(&sensors()).unwrap();
        assert_eq!(list.data_type, DataType::List);
        assert_eq!(list.elements[1].element_number().unwrap(), 1);
        assert_eq!(unpack_record_array::<Sensor>(&list).unwrap(), sensors());
    }

    #[test]
    fn pod_scalar_is_array_of_one() {
        let sample = Sample::numbered(7);
        let list = pack_record(&sample).unwrap();
        assert_eq!(list.data_type, DataType::PodArray);
        assert_eq!(list.elements.len(), 1);
        assert_eq!(
            list.elements[0].data.as_list().unwrap().data_type,
            DataType::Pod
        );
        assert_eq!(unpack_record::<Sample>(&list).unwrap(), sample);
    }

    #[test]
    fn pod_scalar_rejects_multiple_records() {
        let list = pack_record_array(&samples(2)).unwrap();
        assert!(matches!(
            unpack_record::<Sample>(&list),
            Err(ValueError::DataType(_))
        ));
    }

    #[test]
    fn pod_array_roundtrip_including_empty() {
        for n in [0, 1, 9] {
            let records = samples(n);
            let list = pack_record_array(&records).unwrap();
            assert_eq!(unpack_record_array::<Sample>(&list).unwrap(), records);
        }
    }

    #[test]
    fn gap_in_numbering_is_list_format_error() {
        let mut list = pack_record_array(&samples(3)).unwrap();
        list.elements[2].name = 5.into();
        let err = unpack_record_array::<Sample>(&list).unwrap_err();
        assert_eq!(err.to_string(), "data type error: Error in list format");
    }

    #[test]
    fn wrong_type_name_is_data_type_error() {
        let mut list = pack_record_array(&samples(1)).unwrap();
        list.type_name = "example.Other".to_string();
        assert!(matches!(
            unpack_record_array::<Sample>(&list),
            Err(ValueError::DataType(_))
        ));

        let mut list = pack_record_array(&samples(1)).unwrap();
        if let raconteur_value::ElementData::List(inner) = &mut list.elements[0].data {
            inner.type_name = "example.Other".to_string();
        }
        assert!(matches!(
            unpack_record_array::<Sample>(&list),
            Err(ValueError::DataType(_))
        ));
    }

    #[test]
    fn namedarray_flattens_under_array_element() {
        let points = vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.0, 0.5)];
        let list = pack_record_array(&points).unwrap();
        assert_eq!(list.data_type, DataType::NamedArrayArray);
        assert_eq!(
            list.find(ARRAY).unwrap().data.as_slice::<f64>().unwrap(),
            &[1.0, 2.0, 3.0, -1.0, 0.0, 0.5]
        );
        assert_eq!(unpack_record_array::<Vector3>(&list).unwrap(), points);

        let one = pack_record(&points[0]).unwrap();
        assert_eq!(one.find(ARRAY).unwrap().data.count(), 3);
        assert_eq!(unpack_record::<Vector3>(&one).unwrap(), points[0]);
    }

    #[test]
    fn namedarray_rejects_partial_record() {
        let list = ElementList::new(
            DataType::NamedArrayArray,
            Vector3::TYPE_NAME,
            vec![MessageElement::numeric(ARRAY, vec![1.0f64, 2.0])],
        );
        assert!(matches!(
            unpack_record_array::<Vector3>(&list),
            Err(ValueError::DataType(_))
        ));
    }

    #[test]
    fn astructure_uses_its_own_tags() {
        let poses = vec![Pose::identity(), Pose::translated(1.0, 2.0, 3.0)];
        let list = pack_record_array(&poses).unwrap();
        assert_eq!(list.data_type, DataType::AStructureArray);
        assert_eq!(unpack_record_array::<Pose>(&list).unwrap(), poses);

        let mut retagged = list.clone();
        retagged.data_type = DataType::NamedArrayArray;
        assert!(unpack_record_array::<Pose>(&retagged).is_err());
    }

    #[test]
    fn multidim_roundtrip_for_every_family() {
        let pods = MultiDimArray::new(vec![2, 3], samples(6)).unwrap();
        let list = pack_record_multidim(&pods).unwrap();
        assert_eq!(list.data_type, DataType::PodMultiDimArray);
        assert_eq!(unpack_record_multidim::<Sample>(&list).unwrap(), pods);

        let vectors = MultiDimArray::new(
            vec![1, 2],
            vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 1.0, 0.0)],
        )
        .unwrap();
        let list = pack_record_multidim(&vectors).unwrap();
        assert_eq!(list.data_type, DataType::NamedArrayMultiDimArray);
        assert_eq!(unpack_record_multidim::<Vector3>(&list).unwrap(), vectors);

        let poses = MultiDimArray::new(vec![1], vec![Pose::identity()]).unwrap();
        let list = pack_record_multidim(&poses).unwrap();
        assert_eq!(list.data_type, DataType::AStructureMultiDimArray);
        assert_eq!(unpack_record_multidim::<Pose>(&list).unwrap(), poses);

        let grid = MultiDimArray::new(vec![2, 1], sensors()).unwrap();
        let list = pack_record_multidim(&grid).unwrap();
        assert_eq!(unpack_record_multidim::<Sensor>(&list).unwrap(), grid);
    }

    #[test]
    fn multidim_with_zero_sized_dimension() {
        let empty = MultiDimArray::<Sample>::new(vec![0, 4], Vec::new()).unwrap();
        let list = pack_record_multidim(&empty).unwrap();
        assert_eq!(unpack_record_multidim::<Sample>(&list).unwrap(), empty);
    }

    #[test]
    fn multidim_missing_parts_and_bad_shape() {
        let pods = MultiDimArray::new(vec![2], samples(2)).unwrap();

        let mut list = pack_record_multidim(&pods).unwrap();
        list.elements.retain(|e| !e.name.is(DIMS));
        assert!(matches!(
            unpack_record_multidim::<Sample>(&list),
            Err(ValueError::NotFound(_))
        ));

        let mut list = pack_record_multidim(&pods).unwrap();
        list.elements[0] = MessageElement::numeric(DIMS, vec![3u32]);
        assert!(matches!(
            unpack_record_multidim::<Sample>(&list),
            Err(ValueError::DimensionMismatch(_))
        ));
    }
}
