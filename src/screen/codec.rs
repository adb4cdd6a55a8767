//! Raw frame → JPEG payload.
//!
//! Drops alpha, swaps BGR to RGB, downscales so the longer edge fits
//! `max_dimension` (area averaging), JPEG-compresses and base64-encodes.
//! Pure and CPU-bound: callers run it on the blocking pool.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;

use super::{ChannelOrder, FramePayload, RawFrame};
use crate::error::{StreamError, StreamResult};

pub fn encode(frame: &RawFrame, max_dimension: u32, quality: u8) -> StreamResult<FramePayload> {
    check_shape(frame)?;

    let (out_w, out_h) = target_size(frame.width, frame.height, max_dimension);
    let rgb = to_rgb_area_scaled(frame, out_w, out_h);
    let jpeg = jpeg_encode(rgb, out_w, out_h, quality)?;

    Ok(FramePayload::from_jpeg(&jpeg))
}

fn check_shape(frame: &RawFrame) -> StreamResult<()> {
    if frame.channels != 3 && frame.channels != 4 {
        return Err(StreamError::InvalidFrameShape(format!(
            "expected 3 or 4 channels, got {}",
            frame.channels
        )));
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(StreamError::InvalidFrameShape(format!(
            "empty frame {}x{}",
            frame.width, frame.height
        )));
    }

    let row = frame.width as usize * frame.channels as usize;
    if frame.stride < row {
        return Err(StreamError::InvalidFrameShape(format!(
            "stride {} is shorter than a row of {} bytes",
            frame.stride, row
        )));
    }
    let needed = frame.stride * (frame.height as usize - 1) + row;
    if frame.data.len() < needed {
        return Err(StreamError::InvalidFrameShape(format!(
            "buffer holds {} bytes, {}x{}x{} needs {}",
            frame.data.len(),
            frame.width,
            frame.height,
            frame.channels,
            needed
        )));
    }
    Ok(())
}

/// Output size: unchanged if it fits, otherwise the longer edge becomes
/// `max_dimension` and the other is truncated proportionally.
pub fn target_size(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dimension {
        return (width, height);
    }
    let scale = |edge: u32| ((edge as u64 * max_dimension as u64) / longer as u64).max(1) as u32;
    (scale(width), scale(height))
}

/// Convert to packed RGB, averaging every source pixel that falls into
/// each destination cell. With equal sizes this is a plain copy.
fn to_rgb_area_scaled(frame: &RawFrame, dst_w: u32, dst_h: u32) -> Vec<u8> {
    let src_w = frame.width as usize;
    let src_h = frame.height as usize;
    let (dst_w, dst_h) = (dst_w as usize, dst_h as usize);
    let px = frame.channels as usize;
    let (r_off, b_off) = match frame.order {
        ChannelOrder::Rgb => (0, 2),
        ChannelOrder::Bgr => (2, 0),
    };

    let mut rgb = Vec::with_capacity(dst_w * dst_h * 3);

    for y in 0..dst_h {
        let (y0, y1) = cell_span(y, src_h, dst_h);
        for x in 0..dst_w {
            let (x0, x1) = cell_span(x, src_w, dst_w);

            let mut sum = [0u64; 3];
            for sy in y0..y1 {
                let row = sy * frame.stride;
                for sx in x0..x1 {
                    let offset = row + sx * px;
                    sum[0] += frame.data[offset + r_off] as u64;
                    sum[1] += frame.data[offset + 1] as u64;
                    sum[2] += frame.data[offset + b_off] as u64;
                }
            }

            let count = ((y1 - y0) * (x1 - x0)) as u64;
            for channel in sum {
                rgb.push(((channel + count / 2) / count) as u8);
            }
        }
    }

    rgb
}

/// Source index range `[start, end)` covered by destination cell `i`.
fn cell_span(i: usize, src: usize, dst: usize) -> (usize, usize) {
    let start = i * src / dst;
    let end = ((i + 1) * src).div_ceil(dst).clamp(start + 1, src);
    (start, end)
}

fn jpeg_encode(rgb: Vec<u8>, width: u32, height: u32, quality: u8) -> StreamResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| StreamError::Encode("pixel buffer does not match its dimensions".into()))?;

    img.write_with_encoder(encoder)?;

    Ok(buf.into_inner())
}
