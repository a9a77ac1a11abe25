//! YUV 4:2:0 to packed RGB conversion

use tracing::instrument;

use crate::capture::frame::{CanonicalFrame, RawFrame, CHANNELS};
use crate::error::{PipelineError, Result};

// ITU-R BT.601 video range, 20-bit fixed point
const SHIFT: i32 = 20;
const HALF: i32 = 1 << (SHIFT - 1);
const CY: i32 = 1_220_542;
const CUB: i32 = 2_116_026;
const CUG: i32 = -409_993;
const CVG: i32 = -852_492;
const CVR: i32 = 1_673_527;

/// Converts camera frames into [`CanonicalFrame`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct ColorConverter;

impl ColorConverter {
    pub fn new() -> Self {
        Self
    }

    /// Fuse the planes and run the NV21 transform
    #[instrument(level = "trace", skip_all, fields(seq = frame.sequence))]
    pub fn convert(&self, frame: &RawFrame) -> Result<CanonicalFrame> {
        let fused = fuse_planes(frame)?;
        Ok(nv21_to_rgb(&fused, frame.width, frame.height))
    }
}

/// Build the `height * 1.5 x width` NV21 buffer.
///
/// Luma rows come first, then one chroma pair per 2x2 block with the second
/// chroma plane's sample ahead of the first's.
pub fn fuse_planes(frame: &RawFrame) -> Result<Vec<u8>> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
        return Err(PipelineError::InvalidGeometry {
            width: frame.width,
            height: frame.height,
        });
    }
    let (cw, ch) = (w / 2, h / 2);

    let checks = [
        ("luma", frame.luma(), w, h),
        ("first chroma", frame.first_chroma(), cw, ch),
        ("second chroma", frame.second_chroma(), cw, ch),
    ];
    for (plane, p, cols, rows) in checks {
        let needed = p.required_len(cols, rows);
        if p.data.len() < needed {
            return Err(PipelineError::PlaneTooSmall {
                plane,
                needed,
                actual: p.data.len(),
            });
        }
    }

    let mut fused = Vec::with_capacity(w * h + 2 * cw * ch);

    let luma = frame.luma();
    if luma.pixel_stride == 1 {
        for row in 0..h {
            let start = row * luma.row_stride;
            fused.extend_from_slice(&luma.data[start..start + w]);
        }
    } else {
        for row in 0..h {
            fused.extend((0..w).map(|col| luma.sample(col, row)));
        }
    }

    let (u, v) = (frame.first_chroma(), frame.second_chroma());
    for row in 0..ch {
        for col in 0..cw {
            fused.push(v.sample(col, row));
            fused.push(u.sample(col, row));
        }
    }

    Ok(fused)
}

/// NV21 (Y plane, interleaved VU) to packed RGB888
pub fn nv21_to_rgb(nv21: &[u8], width: u32, height: u32) -> CanonicalFrame {
    let mut out = CanonicalFrame::new(width, height);
    let (w, h) = (width as usize, height as usize);
    let (luma, chroma) = nv21.split_at(w * h);

    for row in 0..h {
        let y_row = &luma[row * w..(row + 1) * w];
        let vu_row = &chroma[(row / 2) * w..(row / 2) * w + w];
        let dst = &mut out.data[row * out.stride..row * out.stride + w * CHANNELS];

        for col in 0..w {
            let pair = (col / 2) * 2;
            let v = vu_row[pair] as i32 - 128;
            let u = vu_row[pair + 1] as i32 - 128;
            let y = (y_row[col] as i32 - 16).max(0) * CY;

            let r = (y + HALF + CVR * v) >> SHIFT;
            let g = (y + HALF + CVG * v + CUG * u) >> SHIFT;
            let b = (y + HALF + CUB * u) >> SHIFT;

            let px = &mut dst[col * CHANNELS..(col + 1) * CHANNELS];
            px[0] = r.clamp(0, 255) as u8;
            px[1] = g.clamp(0, 255) as u8;
            px[2] = b.clamp(0, 255) as u8;
        }
    }

    out
}
