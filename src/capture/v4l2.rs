//! V4L2 capture in planar YU12 (I420)

use std::sync::atomic::Ordering;

use bytes::Bytes;
use tracing::{error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Plane, RawFrame};
use crate::capture::source::{CaptureSession, SharedSettings};
use crate::error::{PipelineError, Result};
use crate::pipeline::worker::FrameSender;
use crate::CaptureConfig;

const BUFFER_COUNT: u32 = 4;

/// Memory-mapped V4L2 camera
pub struct V4l2Camera;

impl V4l2Camera {
    /// Open the device, negotiate YU12 and start streaming on a capture
    /// thread.
    ///
    /// Fails when the device cannot capture, or refuses the format or
    /// geometry; the caller logs and carries on without a session.
    #[instrument(skip_all, fields(device = %config.device))]
    pub fn start(
        config: &CaptureConfig,
        settings: SharedSettings,
        sender: FrameSender,
    ) -> Result<CaptureSession> {
        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(std::io::Error::other("device doesn't support video capture").into());
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(b"YU12");
        let fmt = device.set_format(&fmt)?;
        if fmt.fourcc != FourCC::new(b"YU12") {
            return Err(std::io::Error::other(format!(
                "device refused YU12, offered {}",
                fmt.fourcc
            ))
            .into());
        }
        if fmt.width % 2 != 0 || fmt.height % 2 != 0 {
            return Err(PipelineError::InvalidGeometry {
                width: fmt.width,
                height: fmt.height,
            });
        }
        let (width, height, stride) = (fmt.width, fmt.height, fmt.stride as usize);
        info!("Negotiated {}x{} YU12, stride {}", width, height, stride);

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
        info!("Capture stream started with {} buffers", BUFFER_COUNT);

        CaptureSession::spawn("camera", move |stop, counters| {
            // The device must outlive the stream
            let _device = device;
            let mut sequence = 0u64;
            while !stop.load(Ordering::Acquire) && !sender.is_closed() {
                let buf = match stream.next() {
                    Ok((buf, _meta)) => buf,
                    Err(e) => {
                        error!("Capture error: {}", e);
                        break;
                    }
                };
                match split_planes(buf, width, height, stride) {
                    Some(planes) => {
                        let current = settings.current();
                        let frame = RawFrame::new(
                            planes,
                            width,
                            height,
                            current.rotation,
                            current.facing,
                            sequence,
                        );
                        sender.try_deliver(counters.track(frame));
                    }
                    None => warn!(len = buf.len(), "short YU12 buffer skipped"),
                }
                sequence += 1;
            }
        })
    }
}

/// Split a contiguous YU12 buffer (Y, then U, then V) into planes
fn split_planes(buf: &[u8], width: u32, height: u32, stride: usize) -> Option<[Plane; 3]> {
    let h = height as usize;
    let stride = stride.max(width as usize);
    let chroma_stride = stride / 2;
    let luma_len = stride * h;
    let chroma_len = chroma_stride * (h / 2);
    if buf.len() < luma_len + 2 * chroma_len {
        return None;
    }

    let data = Bytes::copy_from_slice(&buf[..luma_len + 2 * chroma_len]);
    Some([
        Plane::new(data.slice(..luma_len), stride, 1),
        Plane::new(data.slice(luma_len..luma_len + chroma_len), chroma_stride, 1),
        Plane::new(data.slice(luma_len + chroma_len..), chroma_stride, 1),
    ])
}
