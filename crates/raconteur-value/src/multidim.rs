use crate::copy::{copy_sub_array, element_count, to_indices};
use crate::element::{ElementList, MessageElement};
use crate::error::{Result, ValueError};
use crate::numeric::NumericElement;
use crate::types::DataType;

/// Element name carrying the shape vector of a multi-dimensional encoding.
pub const DIMS: &str = "dims";
/// Element name carrying the flattened storage.
pub const ARRAY: &str = "array";

/// An N-dimensional array stored as a flat column-major buffer.
///
/// `array.len() == product(dims)` holds for every value of this type.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiDimArray<E> {
    dims: Vec<u32>,
    array: Vec<E>,
}

impl<E: Clone> MultiDimArray<E> {
    /// Build from a shape and matching storage.
    pub fn new(dims: Vec<u32>, array: Vec<E>) -> Result<Self> {
        let expected = element_count(&to_indices(&dims)?)?;
        if array.len() != expected {
            return Err(ValueError::DimensionMismatch(format!(
                "storage holds {} elements, shape {dims:?} needs {expected}",
                array.len()
            )));
        }
        Ok(Self { dims, array })
    }

    /// Build an array of the given shape with every element set to `value`.
    pub fn filled(dims: Vec<u32>, value: E) -> Result<Self> {
        let n = element_count(&to_indices(&dims)?)?;
        Ok(Self {
            dims,
            array: vec![value; n],
        })
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    pub fn dim_count(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn array(&self) -> &[E] {
        &self.array
    }

    /// Mutable access to the storage. The shape cannot change through it.
    pub fn array_mut(&mut self) -> &mut [E] {
        &mut self.array
    }

    pub fn into_parts(self) -> (Vec<u32>, Vec<E>) {
        (self.dims, self.array)
    }

    /// Element at a full index vector.
    pub fn get(&self, index: &[u32]) -> Option<&E> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0usize;
        let mut stride = 1usize;
        for (&i, &d) in index.iter().zip(&self.dims) {
            if i >= d {
                return None;
            }
            offset += i as usize * stride;
            stride *= d as usize;
        }
        self.array.get(offset)
    }

    /// Copy `count` elements starting at `memorypos` into `buffer` at `bufferpos`.
    pub fn retrieve_sub_array(
        &self,
        memorypos: &[u32],
        buffer: &mut MultiDimArray<E>,
        bufferpos: &[u32],
        count: &[u32],
    ) -> Result<()> {
        copy_sub_array(
            &self.array,
            &to_indices(&self.dims)?,
            &to_indices(memorypos)?,
            &mut buffer.array,
            &to_indices(&buffer.dims)?,
            &to_indices(bufferpos)?,
            &to_indices(count)?,
        )
    }

    /// Copy `count` elements from `buffer` at `bufferpos` into this array at `memorypos`.
    pub fn assign_sub_array(
        &mut self,
        memorypos: &[u32],
        buffer: &MultiDimArray<E>,
        bufferpos: &[u32],
        count: &[u32],
    ) -> Result<()> {
        copy_sub_array(
            &buffer.array,
            &to_indices(&buffer.dims)?,
            &to_indices(bufferpos)?,
            &mut self.array,
            &to_indices(&self.dims)?,
            &to_indices(memorypos)?,
            &to_indices(count)?,
        )
    }
}

impl<E: Clone + Default> MultiDimArray<E> {
    /// A new array of shape `count` holding the window at `pos`.
    pub fn sub_array(&self, pos: &[u32], count: &[u32]) -> Result<Self> {
        let mut out = Self::filled(count.to_vec(), E::default())?;
        let origin = vec![0u32; count.len()];
        self.retrieve_sub_array(pos, &mut out, &origin, count)?;
        Ok(out)
    }
}

impl<T: NumericElement> MultiDimArray<T> {
    /// Encode as a `MultiDimArray` element list with `dims` and `array`.
    pub fn pack(&self) -> ElementList {
        ElementList::new(
            DataType::MultiDimArray,
            T::DATA_TYPE.name(),
            vec![
                MessageElement::numeric(DIMS, self.dims.clone()),
                MessageElement::numeric(ARRAY, self.array.clone()),
            ],
        )
    }

    /// Decode a list produced by [`MultiDimArray::pack`].
    pub fn unpack(list: &ElementList) -> Result<Self> {
        list.expect_type(DataType::MultiDimArray, T::DATA_TYPE.name())?;
        let dims = list.find(DIMS)?.data.as_slice::<u32>()?.to_vec();
        let array = list.find(ARRAY)?.data.as_slice::<T>()?.to_vec();
        Self::new(dims, array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::CSingle;

    fn counting(dims: Vec<u32>) -> MultiDimArray<i32> {
        let n: u32 = dims.iter().product();
        MultiDimArray::new(dims, (0..n as i32).collect()).unwrap()
    }

    #[test]
    fn construction_enforces_product_invariant() {
        assert!(MultiDimArray::new(vec![2, 3], vec![0u8; 6]).is_ok());
        assert!(matches!(
            MultiDimArray::new(vec![2, 3], vec![0u8; 5]),
            Err(ValueError::DimensionMismatch(_))
        ));
        let empty = MultiDimArray::<f64>::new(vec![4, 0], Vec::new()).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn get_uses_column_major_layout() {
        let a = counting(vec![3, 2]);
        assert_eq!(a.get(&[0, 0]), Some(&0));
        assert_eq!(a.get(&[1, 0]), Some(&1));
        assert_eq!(a.get(&[0, 1]), Some(&3));
        assert_eq!(a.get(&[3, 0]), None);
        assert_eq!(a.get(&[0]), None);
    }

    #[test]
    fn retrieve_then_assign_restores_original() {
        let original = counting(vec![6, 5, 4]);
        let mut copy = original.clone();

        let window = original.sub_array(&[1, 2, 1], &[4, 3, 2]).unwrap();
        copy.array_mut().iter_mut().for_each(|v| *v = -1);
        copy.assign_sub_array(&[1, 2, 1], &window, &[0, 0, 0], &[4, 3, 2])
            .unwrap();

        for k in 0..4u32 {
            for j in 0..5u32 {
                for i in 0..6u32 {
                    let inside = (1..5).contains(&i) && (2..5).contains(&j) && (1..3).contains(&k);
                    let got = *copy.get(&[i, j, k]).unwrap();
                    if inside {
                        assert_eq!(got, *original.get(&[i, j, k]).unwrap());
                    } else {
                        assert_eq!(got, -1);
                    }
                }
            }
        }
    }

    #[test]
    fn overlapping_writes_read_back_last_written_region() {
        let mut target = MultiDimArray::filled(vec![8, 8], 0u16).unwrap();
        let ones = MultiDimArray::filled(vec![4, 4], 1u16).unwrap();
        let twos = MultiDimArray::filled(vec![4, 4], 2u16).unwrap();
        target.assign_sub_array(&[0, 0], &ones, &[0, 0], &[4, 4]).unwrap();
        target.assign_sub_array(&[2, 2], &twos, &[0, 0], &[4, 4]).unwrap();

        let back = target.sub_array(&[2, 2], &[4, 4]).unwrap();
        assert!(back.array().iter().all(|&v| v == 2));
        assert_eq!(target.get(&[1, 1]), Some(&1));
    }

    #[test]
    fn sub_array_rejects_dimension_count_mismatch() {
        let a = counting(vec![3, 3]);
        let err = a.sub_array(&[0], &[1, 1]).unwrap_err();
        assert!(matches!(err, ValueError::DimensionMismatch(_)));
    }

    #[test]
    fn numeric_pack_unpack_roundtrip() {
        let a = MultiDimArray::new(
            vec![2, 2],
            vec![
                CSingle::new(1.0, 0.0),
                CSingle::new(0.0, 1.0),
                CSingle::new(-1.0, 0.5),
                CSingle::new(2.0, 2.0),
            ],
        )
        .unwrap();
        let list = a.pack();
        assert_eq!(list.data_type, DataType::MultiDimArray);
        assert_eq!(MultiDimArray::<CSingle>::unpack(&list).unwrap(), a);

        let zero = MultiDimArray::<bool>::new(vec![0, 3], Vec::new()).unwrap();
        assert_eq!(MultiDimArray::<bool>::unpack(&zero.pack()).unwrap(), zero);
    }

    #[test]
    fn unpack_detects_missing_and_inconsistent_parts() {
        let mut list = counting(vec![2, 2]).pack();
        list.elements.retain(|e| !e.name.is(ARRAY));
        assert!(matches!(
            MultiDimArray::<i32>::unpack(&list),
            Err(ValueError::NotFound(_))
        ));

        let mut list = counting(vec![2, 2]).pack();
        list.elements[0] = MessageElement::numeric(DIMS, vec![3u32, 2]);
        assert!(matches!(
            MultiDimArray::<i32>::unpack(&list),
            Err(ValueError::DimensionMismatch(_))
        ));

        let list = counting(vec![2, 2]).pack();
        assert!(matches!(
            MultiDimArray::<f64>::unpack(&list),
            Err(ValueError::DataType(_))
        ));
    }
}
