//! Byte layout of a transfer slot

use crate::error::VoutError;

/// Alignment of a slot's total size in bytes
pub const SLOT_ALIGNMENT: usize = 16;

/// Total size and per-plane offsets of one transfer buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    /// Total size, rounded up to [`SLOT_ALIGNMENT`]
    pub size: usize,
    /// Byte offset of each plane, in plane order
    pub offsets: Vec<usize>,
}

impl SlotLayout {
    /// Compute the layout from each plane's `(pitch, lines)`
    ///
    /// Planes are packed back to back. Fails when a plane is empty or the
    /// total does not fit in `usize`.
    pub fn from_planes(planes: &[(usize, usize)]) -> Result<Self, VoutError> {
        let mut size: usize = 0;
        let mut offsets = Vec::with_capacity(planes.len());

        for (i, &(pitch, lines)) in planes.iter().enumerate() {
            if pitch == 0 || lines == 0 {
                return Err(VoutError::Allocation(format!(
                    "plane {} has pitch {} and {} lines",
                    i, pitch, lines
                )));
            }
            let bytes = pitch.checked_mul(lines).ok_or_else(|| {
                VoutError::Allocation(format!("plane {} size overflows ({} x {})", i, pitch, lines))
            })?;
            offsets.push(size);
            size = size
                .checked_add(bytes)
                .ok_or_else(|| VoutError::Allocation("picture size overflows".to_string()))?;
        }

        let size = size
            .checked_next_multiple_of(SLOT_ALIGNMENT)
            .ok_or_else(|| VoutError::Allocation("picture size overflows".to_string()))?;

        Ok(Self { size, offsets })
    }

    /// Byte range of plane `index` given its size in bytes
    pub fn plane_range(&self, index: usize, bytes: usize) -> Option<std::ops::Range<usize>> {
        let start = *self.offsets.get(index)?;
        let end = start.checked_add(bytes)?;
        (end <= self.size).then_some(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_plane_420_size() {
        let layout = SlotLayout::from_planes(&[(640, 480), (320, 240), (320, 240)]).unwrap();
        let raw: usize = 640 * 480 + 320 * 240 * 2;
        assert_eq!(layout.size, raw.next_multiple_of(16));
        assert_eq!(layout.offsets, vec![0, 640 * 480, 640 * 480 + 320 * 240]);
    }

    #[test]
    fn test_size_is_rounded_up() {
        let layout = SlotLayout::from_planes(&[(3, 3)]).unwrap();
        assert_eq!(layout.size, 16);

        let layout = SlotLayout::from_planes(&[(16, 2)]).unwrap();
        assert_eq!(layout.size, 32);
    }

    #[test]
    fn test_offsets_do_not_overlap() {
        let planes = [(100, 7), (52, 3), (52, 3), (100, 7)];
        let layout = SlotLayout::from_planes(&planes).unwrap();
        for (i, window) in layout.offsets.windows(2).enumerate() {
            assert_eq!(window[1] - window[0], planes[i].0 * planes[i].1);
        }
        let last = layout.offsets[3] + 700;
        assert!(last <= layout.size);
    }

    #[test]
    fn test_rejects_empty_and_overflowing_planes() {
        assert!(matches!(
            SlotLayout::from_planes(&[(0, 10)]),
            Err(VoutError::Allocation(_))
        ));
        assert!(matches!(
            SlotLayout::from_planes(&[(usize::MAX / 2, 3)]),
            Err(VoutError::Allocation(_))
        ));
        assert!(matches!(
            SlotLayout::from_planes(&[(usize::MAX - 4, 1)]),
            Err(VoutError::Allocation(_))
        ));
    }

    #[test]
    fn test_plane_range() {
        let layout = SlotLayout::from_planes(&[(8, 2), (4, 1)]).unwrap();
        assert_eq!(layout.plane_range(1, 4), Some(16..20));
        assert_eq!(layout.plane_range(1, 64), None);
        assert_eq!(layout.plane_range(2, 1), None);
    }
}
