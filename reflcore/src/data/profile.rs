use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Represents a 1-D detector count profile along one pixel axis.
///
/// Uses Arc<Vec<f64>> for efficient cloning - clone is O(1) instead of O(n).
/// The pixel axis is always the unit-spaced sequence `0, 1, ..., N-1`, which
/// is what the range-selection pipeline assumes when it converts midpoint
/// coordinates back to indices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PixelProfile {
    pub pixel: Arc<Vec<f64>>,
    pub counts: Arc<Vec<f64>>,
}

// Manual bincode implementation for Arc compatibility
impl Encode for PixelProfile {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        // The pixel axis is implied by the counts, only the counts go over the wire
        bincode::Encode::encode(&*self.counts, encoder)?;
        Ok(())
    }
}

impl<Context> Decode<Context> for PixelProfile {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let counts: Vec<f64> = bincode::Decode::decode(decoder)?;
        Ok(PixelProfile::new(counts))
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for PixelProfile {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let counts: Vec<f64> = bincode::BorrowDecode::borrow_decode(decoder)?;
        Ok(PixelProfile::new(counts))
    }
}

impl PixelProfile {
    /// Constructs a new `PixelProfile` from raw counts.
    ///
    /// The pixel axis is generated as `0, 1, ..., N-1`.
    ///
    /// # Arguments
    ///
    /// * `counts` - A vector of detector counts, one per pixel.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use reflcore::data::profile::PixelProfile;
    /// let profile = PixelProfile::new(vec![0.0, 5.0, 12.0, 3.0]);
    /// assert_eq!(profile.len(), 4);
    /// assert_eq!(*profile.pixel, vec![0.0, 1.0, 2.0, 3.0]);
    /// assert_eq!(profile.total_counts(), 20.0);
    /// ```
    pub fn new(counts: Vec<f64>) -> Self {
        let pixel: Vec<f64> = (0..counts.len()).map(|i| i as f64).collect();
        PixelProfile {
            pixel: Arc::new(pixel),
            counts: Arc::new(counts),
        }
    }

    /// Number of pixels in the profile.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts in the profile.
    pub fn total_counts(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Copies `counts[lo..hi]` into a fresh profile with a zero-based pixel axis.
    ///
    /// Used for flank analysis, where the sub-range is treated as an
    /// independent profile; callers re-offset resulting indices into the
    /// parent coordinate frame themselves. Out-of-range bounds are clamped
    /// to the profile length.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use reflcore::data::profile::PixelProfile;
    /// let profile = PixelProfile::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    /// let flank = profile.sub_profile(2, 4);
    /// assert_eq!(*flank.counts, vec![3.0, 4.0]);
    /// assert_eq!(*flank.pixel, vec![0.0, 1.0]);
    /// ```
    pub fn sub_profile(&self, lo: usize, hi: usize) -> Self {
        let hi = hi.min(self.counts.len());
        let lo = lo.min(hi);
        PixelProfile::new(self.counts[lo..hi].to_vec())
    }
}

impl Display for PixelProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PixelProfile(pixels: {}, total counts: {})",
            self.len(),
            self.total_counts()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_profile_clamps_bounds() {
        let profile = PixelProfile::new(vec![1.0, 2.0, 3.0]);

        let flank = profile.sub_profile(1, 10);
        assert_eq!(*flank.counts, vec![2.0, 3.0]);

        // Degenerate slice collapses to empty instead of panicking
        let empty = profile.sub_profile(5, 4);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_sub_profile_reindexes_axis() {
        let profile = PixelProfile::new(vec![0.0, 0.0, 7.0, 8.0, 9.0]);
        let flank = profile.sub_profile(2, 5);

        // The flank gets its own coordinate frame starting at pixel 0
        assert_eq!(*flank.pixel, vec![0.0, 1.0, 2.0]);
        assert_eq!(flank.total_counts(), 24.0);
    }
}
