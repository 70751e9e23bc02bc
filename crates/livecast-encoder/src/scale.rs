//! NV12 rotation, center crop and nearest-neighbor scaling.

use crate::error::EncoderError;
use crate::EncoderResult;

/// Precomputed pixel mapping from a sensor frame to an encoder frame.
///
/// The source is rotated clockwise by `quarter_turns`, center-cropped to the
/// destination aspect ratio and scaled to the destination size.
#[derive(Debug, Clone)]
pub struct Nv12Transform {
    src: (u32, u32),
    dst: (u32, u32),
    quarter_turns: u8,
    luma_map: Vec<u32>,
    chroma_map: Vec<u32>,
}

impl Nv12Transform {
    pub fn new(src: (u32, u32), quarter_turns: u8, dst: (u32, u32)) -> Self {
        let (sw, sh) = (src.0.max(2) as u64, src.1.max(2) as u64);
        let (dw, dh) = (dst.0.max(2) as u64, dst.1.max(2) as u64);
        let turns = quarter_turns % 4;

        let (ow, oh) = if turns % 2 == 1 { (sh, sw) } else { (sw, sh) };

        // Largest centered rect of the destination aspect
        let (cw, ch) = if ow * dh > oh * dw {
            (oh * dw / dh, oh)
        } else {
            (ow, ow * dh / dw)
        };
        let (cx, cy) = ((ow - cw) / 2, (oh - ch) / 2);

        let source_of = |x: u64, y: u64| -> (u64, u64) {
            let ox = (cx + (2 * x + 1) * cw / (2 * dw)).min(ow - 1);
            let oy = (cy + (2 * y + 1) * ch / (2 * dh)).min(oh - 1);
            match turns {
                0 => (ox, oy),
                1 => (oy, sh - 1 - ox),
                2 => (sw - 1 - ox, sh - 1 - oy),
                _ => (sw - 1 - oy, ox),
            }
        };

        let mut luma_map = Vec::with_capacity((dw * dh) as usize);
        for y in 0..dh {
            for x in 0..dw {
                let (sx, sy) = source_of(x, y);
                luma_map.push((sy * sw + sx) as u32);
            }
        }

        let y_size = sw * sh;
        let mut chroma_map = Vec::with_capacity((dw * dh / 4) as usize);
        for y in 0..dh / 2 {
            for x in 0..dw / 2 {
                let (sx, sy) = source_of(2 * x, 2 * y);
                chroma_map.push((y_size + (sy / 2) * sw + (sx / 2) * 2) as u32);
            }
        }

        Self {
            src: (sw as u32, sh as u32),
            dst: (dw as u32, dh as u32),
            quarter_turns: turns,
            luma_map,
            chroma_map,
        }
    }

    /// Whether this transform was built for the given geometry.
    pub fn matches(&self, src: (u32, u32), quarter_turns: u8, dst: (u32, u32)) -> bool {
        self.src == src && self.quarter_turns == quarter_turns % 4 && self.dst == dst
    }

    pub fn destination(&self) -> (u32, u32) {
        self.dst
    }

    /// Produce the destination frame.
    pub fn apply(&self, src: &[u8]) -> EncoderResult<Vec<u8>> {
        let expected = (self.src.0 * self.src.1 * 3 / 2) as usize;
        if src.len() != expected {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {} bytes ({}x{} NV12), got {}",
                expected,
                self.src.0,
                self.src.1,
                src.len()
            )));
        }

        let mut out = Vec::with_capacity(self.luma_map.len() + self.chroma_map.len() * 2);
        out.extend(self.luma_map.iter().map(|&i| src[i as usize]));
        for &i in &self.chroma_map {
            let i = i as usize;
            out.push(src[i]);
            out.push(src[i + 1]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Luma holds the pixel index; chroma pairs hold (index, index + 100).
    fn numbered(w: u32, h: u32) -> Vec<u8> {
        let mut data: Vec<u8> = (0..w * h).map(|i| i as u8).collect();
        for i in 0..(w * h / 4) {
            data.push(i as u8);
            data.push(i as u8 + 100);
        }
        data
    }

    #[test]
    fn test_identity() {
        let src = numbered(4, 2);
        let t = Nv12Transform::new((4, 2), 0, (4, 2));
        assert_eq!(t.apply(&src).unwrap(), src);
    }

    #[test]
    fn test_quarter_turn_rotates_clockwise() {
        // 4x2 source:
        //   0 1 2 3
        //   4 5 6 7
        // rotated clockwise is 2x4:
        //   4 0
        //   5 1
        //   6 2
        //   7 3
        let src = numbered(4, 2);
        let t = Nv12Transform::new((4, 2), 1, (2, 4));
        let out = t.apply(&src).unwrap();
        assert_eq!(&out[..8], &[4, 0, 5, 1, 6, 2, 7, 3]);
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn test_half_turn() {
        let src = numbered(4, 2);
        let t = Nv12Transform::new((4, 2), 2, (4, 2));
        let out = t.apply(&src).unwrap();
        assert_eq!(&out[..8], &[7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_center_crop_to_square() {
        // 8x4 source cropped to the middle 4x4 and scaled to 2x2
        let src = numbered(8, 4);
        let t = Nv12Transform::new((8, 4), 0, (2, 2));
        let out = t.apply(&src).unwrap();
        // Samples at crop (1,1) and (3,1), i.e. source columns 3 and 5
        assert_eq!(&out[..4], &[11, 13, 27, 29]);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_rejects_wrong_size() {
        let t = Nv12Transform::new((4, 2), 0, (4, 2));
        assert!(t.apply(&[0u8; 5]).is_err());
        assert!(t.matches((4, 2), 4, (4, 2)));
    }
}
