//! Resizing and format conversion for emote uploads.
//!
//! Both operations are CPU bound and synchronous. They are meant to be run
//! through the sandbox in [`super::sandbox`], never directly on the runtime.

use std::io::Cursor;

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{
    AnimationDecoder, Delay, DynamicImage, Frame, ImageDecoder, ImageError, ImageFormat, RgbaImage,
};
use tracing::debug;

use crate::common::{EmoteError, EmoteResult};

use super::mime::{ImageBlob, MimeType};

/// First bounding box tried when shrinking.
pub const START_RESOLUTION: u32 = 128;

/// Shrinking stops once the bounding box falls below this.
pub const MIN_RESOLUTION: u32 = 32;

/// NeuQuant speed for GIF encoding (1 = best quality, 30 = fastest).
const GIF_ENCODE_SPEED: i32 = 10;

/// Resize `image` down until its encoded size fits `budget` bytes.
///
/// Images already within budget are returned untouched: re-encoding small
/// images can make them bigger. Each attempt halves the bounding box,
/// starting at 128x128. Once the box drops below 32x32 the smallest attempt
/// is returned even if it is still over budget.
pub fn shrink_to_fit(image: &ImageBlob, budget: usize) -> EmoteResult<ImageBlob> {
    if image.len() <= budget {
        return Ok(image.clone());
    }

    let source = Decoded::decode(image)?;
    let mut max_resolution = START_RESOLUTION;
    let mut best: Option<ImageBlob> = None;

    loop {
        debug!(
            "image size too big ({} bytes), attempting resize to at most {}x{} pixels",
            best.as_ref().map_or(image.len(), ImageBlob::len),
            max_resolution,
            max_resolution
        );

        let attempt = source.resize_within(max_resolution)?;
        let fits = attempt.len() <= budget;
        if best.as_ref().map_or(true, |b| attempt.len() < b.len()) {
            best = Some(attempt);
        }

        if fits || max_resolution < MIN_RESOLUTION {
            break;
        }
        max_resolution /= 2;
    }

    best.ok_or(EmoteError::InvalidImage)
}

/// Re-encode a still image as a two frame GIF.
///
/// The first frame is the original image shown forever, the second a 1x1
/// transparent filler. The platform refuses single frame GIFs in animated
/// slots.
pub fn convert_to_animated(image: &ImageBlob) -> EmoteResult<ImageBlob> {
    let original = image::load_from_memory(image.data()).map_err(invalid_image)?;
    let forever = Delay::from_numer_denom_ms(0, 1);

    let frames = vec![
        Frame::from_parts(original.to_rgba8(), 0, 0, forever),
        Frame::from_parts(RgbaImage::new(1, 1), 0, 0, forever),
    ];

    ImageBlob::new(encode_gif(frames)?)
}

/// Fit `original` into `target` preserving aspect ratio, in whole pixels.
///
/// If the target box is wider than the image the height is the binding
/// dimension, otherwise the width is.
pub fn scale_resolution(original: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (w, h) = (u64::from(original.0), u64::from(original.1));
    let (tw, th) = (u64::from(target.0), u64::from(target.1));

    if w == 0 || h == 0 {
        return original;
    }

    let (new_w, new_h) = if tw * h > w * th {
        (w * th / h, th)
    } else {
        (tw, h * tw / w)
    };

    (new_w.max(1) as u32, new_h.max(1) as u32)
}

/// Bounding box for one shrink attempt. Never enlarges.
fn bounded(original: (u32, u32), max_resolution: u32) -> (u32, u32) {
    if original.0 <= max_resolution && original.1 <= max_resolution {
        original
    } else {
        scale_resolution(original, (max_resolution, max_resolution))
    }
}

/// A decoded source image, kept around between shrink attempts.
enum Decoded {
    Still {
        image: DynamicImage,
        output: ImageFormat,
    },
    Animated {
        frames: Vec<Frame>,
        dimensions: (u32, u32),
    },
}

impl Decoded {
    fn decode(blob: &ImageBlob) -> EmoteResult<Self> {
        let data = blob.data().as_ref();
        match blob.mime() {
            MimeType::Gif => {
                let decoder = GifDecoder::new(Cursor::new(data)).map_err(invalid_image)?;
                let dimensions = decoder.dimensions();
                let frames = decoder
                    .into_frames()
                    .collect_frames()
                    .map_err(invalid_image)?;
                Ok(Self::Animated { frames, dimensions })
            }
            mime => {
                let (input, output) = match mime {
                    MimeType::Jpeg => (ImageFormat::Jpeg, ImageFormat::Jpeg),
                    MimeType::Webp => (ImageFormat::WebP, ImageFormat::Png),
                    _ => (ImageFormat::Png, ImageFormat::Png),
                };
                let image =
                    image::load_from_memory_with_format(data, input).map_err(invalid_image)?;
                Ok(Self::Still { image, output })
            }
        }
    }

    fn resize_within(&self, max_resolution: u32) -> EmoteResult<ImageBlob> {
        match self {
            Self::Still { image, output } => {
                let (w, h) = bounded((image.width(), image.height()), max_resolution);
                let resized = image.resize_exact(w, h, FilterType::Lanczos3);

                let mut buf = Cursor::new(Vec::new());
                resized.write_to(&mut buf, *output).map_err(invalid_image)?;
                ImageBlob::new(buf.into_inner())
            }
            Self::Animated { frames, dimensions } => {
                let (w, h) = bounded(*dimensions, max_resolution);
                let scale = |value: u32, new: u32, old: u32| {
                    (u64::from(value) * u64::from(new) / u64::from(old.max(1))) as u32
                };

                let resized = frames.iter().map(|frame| {
                    let buffer = frame.buffer();
                    let fw = scale(buffer.width(), w, dimensions.0).max(1);
                    let fh = scale(buffer.height(), h, dimensions.1).max(1);
                    Frame::from_parts(
                        imageops::resize(buffer, fw, fh, FilterType::Triangle),
                        scale(frame.left(), w, dimensions.0),
                        scale(frame.top(), h, dimensions.1),
                        frame.delay(),
                    )
                });

                ImageBlob::new(encode_gif(resized)?)
            }
        }
    }
}

fn encode_gif(frames: impl IntoIterator<Item = Frame>) -> EmoteResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buf, GIF_ENCODE_SPEED);
        encoder.set_repeat(Repeat::Infinite).map_err(invalid_image)?;
        encoder.encode_frames(frames).map_err(invalid_image)?;
    }
    Ok(buf)
}

fn invalid_image(error: ImageError) -> EmoteError {
    debug!("image codec error: {}", error);
    EmoteError::InvalidImage
}
