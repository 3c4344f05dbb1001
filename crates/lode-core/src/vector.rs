//! Vector math: normalization, dot product, little-endian blob codec.
//!
//! Accumulation happens in f64 to keep cosine scores stable across
//! vector lengths; storage stays f32.

use crate::errors::{LodeError, LodeResult};

/// Magnitudes at or below this cannot be normalized.
const NORM_EPSILON: f64 = 1e-12;

/// Scale a vector to unit length, preserving direction.
pub fn normalize(v: &[f32]) -> LodeResult<Vec<f32>> {
    if v.is_empty() {
        return Err(LodeError::invalid_argument("cannot normalize an empty vector"));
    }
    let magnitude = v
        .iter()
        .map(|x| (*x as f64) * (*x as f64))
        .sum::<f64>()
        .sqrt();
    if magnitude <= NORM_EPSILON {
        return Err(LodeError::invalid_argument(
            "cannot normalize a vector with near-zero magnitude",
        ));
    }
    Ok(v.iter().map(|x| ((*x as f64) / magnitude) as f32).collect())
}

/// Dot product of two equal-length vectors.
///
/// For unit-norm inputs this is the cosine similarity, in `[-1, 1]`.
pub fn dot(a: &[f32], b: &[f32]) -> LodeResult<f64> {
    if a.len() != b.len() {
        return Err(LodeError::invalid_argument(format!(
            "dot product length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum())
}

/// Serialize a vector as little-endian IEEE-754 f32 bytes.
pub fn to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a little-endian f32 blob back into a vector.
pub fn from_blob(bytes: &[u8]) -> LodeResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(LodeError::invalid_argument(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let unit = normalize(&[3.0, 4.0]).unwrap();
        let magnitude: f64 = unit.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>();
        assert!((magnitude.sqrt() - 1.0).abs() <= 1e-5);
        // Direction preserved: 3:4 ratio survives.
        assert!((unit[0] / unit[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_empty_and_zero() {
        assert!(matches!(
            normalize(&[]),
            Err(LodeError::InvalidArgument { .. })
        ));
        assert!(matches!(
            normalize(&[0.0, 0.0, 0.0]),
            Err(LodeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn dot_rejects_length_mismatch() {
        assert!(matches!(
            dot(&[1.0], &[1.0, 2.0]),
            Err(LodeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn dot_of_unit_vectors_is_cosine() {
        let a = normalize(&[1.0, 0.0]).unwrap();
        let b = normalize(&[0.0, 1.0]).unwrap();
        assert!(dot(&a, &b).unwrap().abs() < 1e-9);
        assert!((dot(&a, &a).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn blob_roundtrip_special_values() {
        let v = vec![
            f32::MAX,
            f32::MIN,
            f32::EPSILON,
            -f32::EPSILON,
            0.0,
            -0.0,
            1.5,
        ];
        let blob = to_blob(&v);
        assert_eq!(blob.len(), v.len() * 4);
        let back = from_blob(&blob).unwrap();
        for (orig, round) in v.iter().zip(back.iter()) {
            assert_eq!(orig.to_bits(), round.to_bits());
        }
    }

    #[test]
    fn from_blob_rejects_ragged_input() {
        assert!(matches!(
            from_blob(&[1, 2, 3]),
            Err(LodeError::InvalidArgument { .. })
        ));
    }

    proptest! {
        #[test]
        fn blob_roundtrip_is_bit_exact(v in proptest::collection::vec(any::<f32>(), 0..64)) {
            let back = from_blob(&to_blob(&v)).unwrap();
            prop_assert_eq!(v.len(), back.len());
            for (orig, round) in v.iter().zip(back.iter()) {
                prop_assert_eq!(orig.to_bits(), round.to_bits());
            }
        }

        #[test]
        fn normalize_is_unit_norm(v in proptest::collection::vec(-1000.0f32..1000.0, 1..64)) {
            prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
            let unit = normalize(&v).unwrap();
            let magnitude = unit.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
            prop_assert!((magnitude - 1.0).abs() <= 1e-5);
        }
    }
}
