use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which side of the device the active lens points to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    #[default]
    Back,
}

impl Facing {
    pub fn toggled(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

/// Display rotation hint delivered with each frame.
///
/// Only 0, 90 and 270 degrees have dedicated handling. Everything else,
/// 180 included, collapses to `Deg0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayRotation {
    #[default]
    Deg0,
    Deg90,
    Deg270,
}

impl DisplayRotation {
    pub fn from_degrees(degrees: u32) -> Self {
        match degrees {
            90 => DisplayRotation::Deg90,
            270 => DisplayRotation::Deg270,
            _ => DisplayRotation::Deg0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            DisplayRotation::Deg0 => 0,
            DisplayRotation::Deg90 => 90,
            DisplayRotation::Deg270 => 270,
        }
    }
}

/// One camera plane with its memory layout
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes between the starts of two consecutive rows
    pub row_stride: usize,
    /// Bytes between two consecutive samples of a row
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Bytes, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Sample at (`col`, `row`) in plane coordinates
    #[inline]
    pub fn sample(&self, col: usize, row: usize) -> u8 {
        self.data[row * self.row_stride + col * self.pixel_stride]
    }

    /// Smallest buffer that holds `cols` x `rows` samples with this layout
    pub fn required_len(&self, cols: usize, rows: usize) -> usize {
        if cols == 0 || rows == 0 {
            return 0;
        }
        (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Camera-native YUV 4:2:0 frame.
///
/// The frame belongs to the source that produced it until it is released.
/// Release happens exactly once: either through [`RawFrame::release`] or
/// when the frame is dropped on any other path.
pub struct RawFrame {
    /// Luma, first chroma (U / Cb), second chroma (V / Cr)
    pub planes: [Plane; 3],
    pub width: u32,
    pub height: u32,
    pub rotation: DisplayRotation,
    pub facing: Facing,
    pub sequence: u64,
    pub timestamp: Instant,
    release: Option<ReleaseHook>,
}

impl RawFrame {
    pub fn new(
        planes: [Plane; 3],
        width: u32,
        height: u32,
        rotation: DisplayRotation,
        facing: Facing,
        sequence: u64,
    ) -> Self {
        Self {
            planes,
            width,
            height,
            rotation,
            facing,
            sequence,
            timestamp: Instant::now(),
            release: None,
        }
    }

    /// Attach the callback that hands the frame back to its source
    pub fn with_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn luma(&self) -> &Plane {
        &self.planes[0]
    }

    pub fn first_chroma(&self) -> &Plane {
        &self.planes[1]
    }

    pub fn second_chroma(&self) -> &Plane {
        &self.planes[2]
    }

    /// Give the frame back to its source
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation", &self.rotation)
            .field("facing", &self.facing)
            .finish_non_exhaustive()
    }
}

/// Bytes per canonical pixel (packed RGB888)
pub const CHANNELS: usize = 3;

/// Packed RGB888 frame produced by the pipeline
#[derive(Clone, PartialEq, Eq)]
pub struct CanonicalFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: usize,
}

impl CanonicalFrame {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width as usize * CHANNELS;
        Self {
            data: vec![0; stride * height as usize],
            width,
            height,
            stride,
        }
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride + x as usize * CHANNELS
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = self.offset(x, y);
        self.data[i..i + CHANNELS].copy_from_slice(&rgb);
    }

    /// Borrow the buffer for an engine call
    pub fn view_mut(&mut self) -> FrameViewMut<'_> {
        FrameViewMut {
            data: &mut self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }

    pub fn from_rgb_image(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            stride: width as usize * CHANNELS,
        }
    }

    /// Repack into an `image` buffer, dropping any row padding
    pub fn to_rgb_image(&self) -> image::RgbImage {
        let row = self.width as usize * CHANNELS;
        let mut packed = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.stride;
            packed.extend_from_slice(&self.data[start..start + row]);
        }
        image::RgbImage::from_raw(self.width, self.height, packed)
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }
}

impl fmt::Debug for CanonicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

/// Non-owning view over a canonical frame's pixels.
///
/// Valid only for the duration of the call it is passed to.
pub struct FrameViewMut<'a> {
    pub data: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
}

impl FrameViewMut<'_> {
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        let row = self.width as usize * CHANNELS;
        self.data
            .chunks_mut(self.stride)
            .take(self.height as usize)
            .map(move |r| &mut r[..row])
    }
}
