//! Sample types and interleaved buffer helpers

/// Type alias for audio samples (host buffers are 32-bit float)
pub type Sample = f32;

/// Frame count of an interleaved buffer, ignoring a trailing partial frame
#[inline]
pub fn frame_count(interleaved: &[Sample], channels: usize) -> usize {
    if channels == 0 {
        0
    } else {
        interleaved.len() / channels
    }
}

/// Sum of squares
#[inline]
pub fn energy(samples: &[Sample]) -> f64 {
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(&[0.0; 8], 2), 4);
        assert_eq!(frame_count(&[0.0; 7], 2), 3);
        assert_eq!(frame_count(&[0.0; 7], 0), 0);
    }

    #[test]
    fn test_energy() {
        assert!((energy(&[3.0, 4.0]) - 25.0).abs() < 1e-12);
        assert_eq!(energy(&[]), 0.0);
    }
}
