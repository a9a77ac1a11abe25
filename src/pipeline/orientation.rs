//! Upright correction for landscape-native sensors

use crate::capture::frame::{CanonicalFrame, DisplayRotation, Facing, CHANNELS};

/// Rotates and mirrors canonical frames so they present upright
#[derive(Debug, Default, Clone, Copy)]
pub struct OrientationCorrector;

impl OrientationCorrector {
    pub fn new() -> Self {
        Self
    }

    /// Apply the transform for `rotation` and `facing`.
    ///
    /// At 0 degrees the frame is transposed and then mirrored: horizontally
    /// for the back lens, vertically for the front one. 90 degrees is the
    /// sensor's natural orientation. 270 degrees turns the frame upside down.
    pub fn correct(
        &self,
        frame: CanonicalFrame,
        rotation: DisplayRotation,
        facing: Facing,
    ) -> CanonicalFrame {
        match rotation {
            DisplayRotation::Deg0 => {
                let mut out = transpose(&frame);
                match facing {
                    Facing::Back => flip_horizontal(&mut out),
                    Facing::Front => flip_vertical(&mut out),
                }
                out
            }
            DisplayRotation::Deg90 => frame,
            DisplayRotation::Deg270 => {
                let mut out = frame;
                flip_both(&mut out);
                out
            }
        }
    }
}

/// Swap rows and columns into a fresh buffer
pub fn transpose(src: &CanonicalFrame) -> CanonicalFrame {
    let mut dst = CanonicalFrame::new(src.height, src.width);
    for y in 0..src.height as usize {
        let row = &src.data[y * src.stride..];
        for x in 0..src.width as usize {
            let from = x * CHANNELS;
            let to = x * dst.stride + y * CHANNELS;
            dst.data[to..to + CHANNELS].copy_from_slice(&row[from..from + CHANNELS]);
        }
    }
    dst
}

/// Mirror around the vertical axis
pub fn flip_horizontal(frame: &mut CanonicalFrame) {
    let w = frame.width as usize;
    let row_len = w * CHANNELS;
    for row in frame.data.chunks_mut(frame.stride).take(frame.height as usize) {
        let row = &mut row[..row_len];
        for x in 0..w / 2 {
            let (a, b) = (x * CHANNELS, (w - 1 - x) * CHANNELS);
            for c in 0..CHANNELS {
                row.swap(a + c, b + c);
            }
        }
    }
}

/// Mirror around the horizontal axis
pub fn flip_vertical(frame: &mut CanonicalFrame) {
    let h = frame.height as usize;
    let row_len = frame.width as usize * CHANNELS;
    let stride = frame.stride;
    for y in 0..h / 2 {
        let (top, bottom) = frame.data.split_at_mut((h - 1 - y) * stride);
        top[y * stride..y * stride + row_len].swap_with_slice(&mut bottom[..row_len]);
    }
}

/// 180 degree turn
pub fn flip_both(frame: &mut CanonicalFrame) {
    flip_vertical(frame);
    flip_horizontal(frame);
}
