//! Animated-image frame handling.
//!
//! Decoding expands a GIF into owned still frames (the decoder reuses an
//! internal cursor, so every frame is materialized as its own buffer).
//! Alignment truncates all conditioning sequences to a common length, and
//! export serializes generated frames back into a single GIF.

use candle_core::{DType, Device, Tensor};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::{AnimationDecoder, Delay, DynamicImage, Frame, RgbImage, RgbaImage};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Upper bound on the generated frame count. Conditioning sequences longer
/// than this are truncated; generation cost and memory stay bounded.
pub const MAX_FRAMES: usize = 32;

/// Playback rate written into exported GIFs.
pub const EXPORT_FPS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Failed to open animated image: {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode animated image: {path}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Animated image contains no frames: {path}")]
    Empty { path: String },

    #[error("Failed to write animated image: {path}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to create output file: {path}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Decode a GIF into an ordered sequence of independent RGB frames.
pub fn decode_gif(path: impl AsRef<Path>) -> Result<Vec<RgbImage>, FrameError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| FrameError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| FrameError::Decode {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut frames = Vec::new();
    for frame in decoder.into_frames() {
        let frame = frame.map_err(|e| FrameError::Decode {
            path: path.display().to_string(),
            source: e,
        })?;
        frames.push(DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8());
    }

    if frames.is_empty() {
        return Err(FrameError::Empty {
            path: path.display().to_string(),
        });
    }
    Ok(frames)
}

/// Truncate every sequence to the common target length
/// `min(MAX_FRAMES, min(len))`, keeping frames from the start.
///
/// Returns the resolved length. All sequences come out temporally aligned:
/// frame i of sequence j corresponds to generation frame i.
pub fn align_frame_counts(sequences: &mut [Vec<RgbImage>]) -> usize {
    let shortest = sequences.iter().map(Vec::len).min().unwrap_or(0);
    let target = shortest.min(MAX_FRAMES);
    for seq in sequences.iter_mut() {
        seq.truncate(target);
    }
    target
}

/// Write frames as a single looping GIF.
pub fn export_gif(frames: &[RgbImage], path: impl AsRef<Path>) -> Result<(), FrameError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| FrameError::Create {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|e| FrameError::Encode {
            path: path.display().to_string(),
            source: e,
        })?;

    let delay = Delay::from_numer_denom_ms(1000, EXPORT_FPS);
    for frame in frames {
        let rgba: RgbaImage = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        encoder
            .encode_frame(Frame::from_parts(rgba, 0, 0, delay))
            .map_err(|e| FrameError::Encode {
                path: path.display().to_string(),
                source: e,
            })?;
    }
    Ok(())
}

/// Convert a conditioning frame sequence into a `[F, 3, height, width]`
/// tensor in `[0, 1]`, resizing each frame to the target dimensions.
pub fn frames_to_tensor(
    frames: &[RgbImage],
    width: usize,
    height: usize,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let mut planes = Vec::with_capacity(frames.len());
    for frame in frames {
        let resized = if frame.width() as usize == width && frame.height() as usize == height {
            frame.clone()
        } else {
            image::imageops::resize(
                frame,
                width as u32,
                height as u32,
                image::imageops::FilterType::Triangle,
            )
        };
        let data: Vec<f32> = resized.into_raw().iter().map(|&b| b as f32 / 255.0).collect();
        // HWC -> CHW
        let t = Tensor::from_vec(data, (height, width, 3), device)?
            .permute((2, 0, 1))?
            .contiguous()?;
        planes.push(t);
    }
    Tensor::stack(&planes, 0)
}

/// Convert one decoded video frame tensor `[3, H, W]` in `[-1, 1]` into an
/// RGB image.
pub fn tensor_to_frame(frame: &Tensor) -> candle_core::Result<RgbImage> {
    let (_c, height, width) = frame.dims3()?;
    let scaled = ((frame.to_dtype(DType::F32)?.clamp(-1.0, 1.0)? + 1.0)? * 127.5)?;
    // CHW -> HWC
    let data = scaled
        .permute((1, 2, 0))?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<f32>()?
        .iter()
        .map(|&v| v.round().clamp(0.0, 255.0) as u8)
        .collect::<Vec<u8>>();

    match RgbImage::from_raw(width as u32, height as u32, data) {
        Some(img) => Ok(img),
        None => candle_core::bail!("frame buffer size mismatch for {width}x{height} image"),
    }
}
