//! Host buffer <-> wire tensor conversion.
//!
//! Images travel as channel-last f16 samples in [-1, 1]; masks travel as
//! single-channel bytes carrying the engine's mask semantics.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use half::f16;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageBuffer, Luma, LumaA, Rgb, Rgb32FImage, Rgba};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::{
    BridgeError, ElementType, Result, TensorLayout, WireTensor, WireTensorHeader,
};

/// Mask byte for areas the engine keeps untouched
pub const MASK_RETAIN: u8 = 0;

/// Mask byte for areas regenerated at the configured strength
pub const MASK_REGENERATE: u8 = 2;

/// Mask intensities below this are retained
pub const MASK_THRESHOLD: u8 = 50;

/// Control types whose hint is sent as a single luminance channel
const SINGLE_CHANNEL_CONTROLS: &[&str] = &["depth", "scribble", "canny"];

/// Range of the host's floating point samples
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SampleRange {
    /// Samples in [0, 1]
    #[default]
    Unit,
    /// Samples in [0, 255]
    Byte,
}

impl SampleRange {
    fn quantize(self, v: f32) -> u8 {
        let scaled = match self {
            SampleRange::Unit => v * 255.0,
            SampleRange::Byte => v,
        };
        // Truncates like the host's own float-to-byte image conversion.
        if scaled.is_finite() {
            scaled.clamp(0.0, 255.0) as u8
        } else {
            0
        }
    }
}

/// Batched host image in BHWC order
#[derive(Clone, Debug)]
pub struct HostImage {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub range: SampleRange,
    pub data: Vec<f32>,
}

impl HostImage {
    pub fn new(
        batch: usize,
        height: usize,
        width: usize,
        channels: usize,
        range: SampleRange,
        data: Vec<f32>,
    ) -> Result<Self> {
        let expected = batch * height * width * channels;
        if data.len() != expected {
            return Err(BridgeError::Image(format!(
                "buffer holds {} samples, shape needs {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            batch,
            height,
            width,
            channels,
            range,
            data,
        })
    }

    /// Single frame filled with one value per channel
    pub fn filled(height: usize, width: usize, pixel: &[f32], range: SampleRange) -> Self {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(height * width * pixel.len())
            .collect();
        Self {
            batch: 1,
            height,
            width,
            channels: pixel.len(),
            range,
            data,
        }
    }

    fn frame(&self, index: usize) -> Result<&[f32]> {
        if index >= self.batch {
            return Err(BridgeError::Image(format!(
                "batch index {} out of range for batch of {}",
                index, self.batch
            )));
        }
        let len = self.height * self.width * self.channels;
        Ok(&self.data[index * len..(index + 1) * len])
    }
}

/// Batched host mask in BHW order with samples in [0, 1]
#[derive(Clone, Debug)]
pub struct HostMask {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl HostMask {
    pub fn new(batch: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != batch * height * width {
            return Err(BridgeError::Image(format!(
                "mask holds {} samples, shape needs {}",
                data.len(),
                batch * height * width
            )));
        }
        Ok(Self {
            batch,
            height,
            width,
            data,
        })
    }

    fn frame(&self, index: usize) -> Result<&[f32]> {
        if index >= self.batch {
            return Err(BridgeError::Image(format!(
                "mask index {} out of range for batch of {}",
                index, self.batch
            )));
        }
        let len = self.height * self.width;
        Ok(&self.data[index * len..(index + 1) * len])
    }
}

/// f16 samples decoded from an image or preview tensor
#[derive(Clone, Debug)]
pub struct RawSamples {
    pub header: WireTensorHeader,
    pub samples: Vec<f32>,
}

/// 8-bit pixels decoded from a final image tensor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// 4 for RGBA, otherwise 3 (RGB)
    pub channels: u32,
    pub data: Vec<u8>,
}

impl DecodedImage {
    pub fn has_alpha(&self) -> bool {
        self.channels == 4
    }

    pub fn into_image(self) -> Option<DynamicImage> {
        if self.has_alpha() {
            ImageBuffer::<Rgba<u8>, _>::from_raw(self.width, self.height, self.data)
                .map(DynamicImage::ImageRgba8)
        } else {
            ImageBuffer::<Rgb<u8>, _>::from_raw(self.width, self.height, self.data)
                .map(DynamicImage::ImageRgb8)
        }
    }
}

fn to_dynamic(bytes: Vec<u8>, width: u32, height: u32, channels: usize) -> Result<DynamicImage> {
    let image = match channels {
        1 => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, bytes).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, bytes)
            .map(DynamicImage::ImageLumaA8),
        3 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8),
        4 => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, bytes)
            .map(DynamicImage::ImageRgba8),
        _ => None,
    };
    image.ok_or_else(|| {
        BridgeError::Image(format!(
            "cannot build a {}x{} image with {} channels",
            width, height, channels
        ))
    })
}

/// Resized size and crop offset for covering `width` x `height`
fn cover_geometry(src_w: u32, src_h: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let scale = f64::max(height as f64 / src_h as f64, width as f64 / src_w as f64);
    let scaled_w = ((src_w as f64 * scale) as u32).max(width);
    let scaled_h = ((src_h as f64 * scale) as u32).max(height);
    let left = ((scaled_w - width) as f64 / 2.0).round() as u32;
    let top = ((scaled_h - height) as f64 / 2.0).round() as u32;
    (scaled_w, scaled_h, left, top)
}

fn check_target(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(BridgeError::Image(format!("invalid target size {}x{}", width, height)));
    }
    Ok(())
}

/// Scale to cover `width` x `height`, then center-crop to it
pub fn resize_crop(image: DynamicImage, width: u32, height: u32) -> Result<DynamicImage> {
    check_target(width, height)?;

    let (src_w, src_h) = image.dimensions();
    if (src_w, src_h) == (width, height) {
        return Ok(image);
    }
    if src_w == 0 || src_h == 0 {
        return Err(BridgeError::Image("empty source image".into()));
    }

    let (scaled_w, scaled_h, left, top) = cover_geometry(src_w, src_h, width, height);
    let resized = if (scaled_w, scaled_h) == (src_w, src_h) {
        image
    } else {
        image.resize_exact(scaled_w, scaled_h, FilterType::Triangle)
    };
    Ok(resized.crop_imm(left, top, width, height))
}

/// Float RGB counterpart of [`resize_crop`]
fn resize_crop_rgb32(frame: Rgb32FImage, width: u32, height: u32) -> Rgb32FImage {
    let (src_w, src_h) = frame.dimensions();
    if (src_w, src_h) == (width, height) {
        return frame;
    }
    let (scaled_w, scaled_h, left, top) = cover_geometry(src_w, src_h, width, height);
    let resized = if (scaled_w, scaled_h) == (src_w, src_h) {
        frame
    } else {
        imageops::resize(&frame, scaled_w, scaled_h, FilterType::Triangle)
    };
    imageops::crop_imm(&resized, left, top, width, height).to_image()
}

/// Pose hint for one frame.
///
/// Every frame of the batch is resized first; the whole resized batch is
/// then min-max normalized into [0.5, 1] before the selected frame is
/// quantized to RGB bytes.
fn pose_frame(image: &HostImage, batch_index: usize, width: u32, height: u32) -> Result<DynamicImage> {
    check_target(width, height)?;
    image.frame(batch_index)?;
    if image.channels == 0 || image.width == 0 || image.height == 0 {
        return Err(BridgeError::Image("empty pose image".into()));
    }

    let mut frames = Vec::with_capacity(image.batch);
    for index in 0..image.batch {
        let rgb: Vec<f32> = image
            .frame(index)?
            .chunks_exact(image.channels)
            .flat_map(|px| {
                let at = |c: usize| px.get(c).or_else(|| px.first()).copied().unwrap_or(0.0);
                [at(0), at(1), at(2)]
            })
            .collect();
        let buffer = Rgb32FImage::from_raw(image.width as u32, image.height as u32, rgb)
            .ok_or_else(|| BridgeError::Image("pose frame does not match its shape".into()))?;
        frames.push(resize_crop_rgb32(buffer, width, height));
    }

    let (min, max) = frames
        .iter()
        .flat_map(|f| f.as_raw().iter())
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = max - min;

    let bytes = frames[batch_index]
        .as_raw()
        .iter()
        .map(|&v| {
            let unit = if span > 0.0 { (v - min) / span } else { 0.0 };
            SampleRange::Unit.quantize(unit / 2.0 + 0.5)
        })
        .collect();
    to_dynamic(bytes, width, height, 3)
}

/// Encode one frame of a host image as a channel-last f16 tensor
pub fn encode_image(
    image: &HostImage,
    batch_index: usize,
    width: u32,
    height: u32,
    control_type: Option<&str>,
) -> Result<WireTensor> {
    let mut pixels = if control_type == Some("pose") {
        pose_frame(image, batch_index, width, height)?
    } else {
        let bytes: Vec<u8> = image
            .frame(batch_index)?
            .iter()
            .map(|&v| image.range.quantize(v))
            .collect();
        let pixels = to_dynamic(bytes, image.width as u32, image.height as u32, image.channels)?;
        resize_crop(pixels, width, height)?
    };

    if control_type.is_some_and(|tag| SINGLE_CHANNEL_CONTROLS.contains(&tag)) {
        pixels = DynamicImage::ImageLuma8(pixels.to_luma8());
    }

    let channels = pixels.color().channel_count() as u32;
    let header = WireTensorHeader::new(TensorLayout::Nhwc, ElementType::F16, height, width, channels);

    let mut payload = Vec::with_capacity(header.payload_len()?);
    for &byte in pixels.as_bytes() {
        let v = byte as f32 / 255.0 * 2.0 - 1.0;
        payload.write_u16::<LittleEndian>(f16::from_f32(v).to_bits())?;
    }

    debug!(width, height, channels, control_type, "encoded image tensor");
    Ok(WireTensor { header, payload })
}

/// Encode one frame of a host mask as a single-channel byte tensor
pub fn encode_mask(mask: &HostMask, batch_index: usize, width: u32, height: u32) -> Result<WireTensor> {
    let frame = mask.frame(batch_index)?;
    let bytes: Vec<u8> = frame.iter().map(|&v| SampleRange::Unit.quantize(v)).collect();

    let pixels = to_dynamic(bytes, mask.width as u32, mask.height as u32, 1)?;
    let pixels = resize_crop(pixels, width, height)?.to_luma8();

    let payload = pixels
        .into_raw()
        .into_iter()
        .map(|p| if p < MASK_THRESHOLD { MASK_RETAIN } else { MASK_REGENERATE })
        .collect();

    let header = WireTensorHeader::new(TensorLayout::Nchw, ElementType::U8, height, width, 1);
    Ok(WireTensor { header, payload })
}

/// Decode an image or preview tensor into f32 samples.
///
/// Returns `BridgeError::CorruptFrame` when the first sample is NaN.
pub fn decode_samples(data: &[u8]) -> Result<RawSamples> {
    let tensor = WireTensor::decode(data)?;
    let header = tensor.header;
    if header.element_type != ElementType::F16 {
        return Err(BridgeError::InvalidHeader(format!(
            "expected f16 samples, got {:?}",
            header.element_type
        )));
    }

    let raw = tensor.raw_payload()?;
    let count = header.sample_count()?;
    if raw.len() < count * 2 {
        return Err(BridgeError::Truncated {
            needed: count * 2,
            actual: raw.len(),
        });
    }
    let mut cursor = Cursor::new(&raw[..count * 2]);
    let mut bits = vec![0u16; count];
    cursor.read_u16_into::<LittleEndian>(&mut bits)?;

    let samples: Vec<f32> = bits.into_iter().map(|b| f16::from_bits(b).to_f32()).collect();
    if samples.first().is_some_and(|v| v.is_nan()) {
        warn!(
            height = header.height,
            width = header.width,
            "NaN detected in decoded tensor, dropping frame"
        );
        return Err(BridgeError::CorruptFrame);
    }

    Ok(RawSamples { header, samples })
}

/// Map a signed sample to a byte: `clamp(round((x + 1) * 127.5), 0, 255)`
pub fn sample_to_byte(x: f32) -> u8 {
    ((x + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

/// Decode a final image tensor into 8-bit RGB or RGBA pixels
pub fn decode_image(data: &[u8]) -> Result<DecodedImage> {
    let RawSamples { header, samples } = decode_samples(data)?;
    let channels = header.channels as usize;
    if channels == 0 {
        return Err(BridgeError::InvalidHeader("image tensor with zero channels".into()));
    }

    let out_channels = if channels == 4 { 4 } else { 3 };
    let mut data = Vec::with_capacity(header.height as usize * header.width as usize * out_channels);
    for pixel in samples.chunks_exact(channels) {
        match channels {
            4 => data.extend(pixel.iter().map(|&x| sample_to_byte(x))),
            1 | 2 => {
                let v = sample_to_byte(pixel[0]);
                data.extend([v, v, v]);
            }
            _ => data.extend(pixel[..3].iter().map(|&x| sample_to_byte(x))),
        }
    }

    Ok(DecodedImage {
        width: header.width,
        height: header.height,
        channels: out_channels as u32,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HEADER_LEN;

    fn f16_samples(tensor: &WireTensor) -> Vec<f32> {
        tensor
            .payload
            .chunks_exact(2)
            .map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
            .collect()
    }

    #[test]
    fn test_white_image_encodes_to_ones() {
        let image = HostImage::filled(64, 128, &[255.0, 255.0, 255.0], SampleRange::Byte);
        let tensor = encode_image(&image, 0, 128, 64, None).unwrap();

        let bytes = tensor.encode().unwrap();
        let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(6), 64);
        assert_eq!(word(7), 128);
        assert_eq!(word(8), 3);
        assert_eq!(bytes.len(), HEADER_LEN + 64 * 128 * 3 * 2);

        assert!(f16_samples(&tensor).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_unit_range_black_encodes_to_minus_one() {
        let image = HostImage::filled(2, 2, &[0.0, 0.0, 0.0], SampleRange::Unit);
        let tensor = encode_image(&image, 0, 2, 2, None).unwrap();
        assert!(f16_samples(&tensor).iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_image_round_trip_within_one_level() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..16 * 24 * 3).map(|_| rng.gen_range(0..=255) as f32).collect();
        let image = HostImage::new(1, 16, 24, 3, SampleRange::Byte, data.clone()).unwrap();

        let bytes = encode_image(&image, 0, 24, 16, None).unwrap().encode().unwrap();
        let decoded = decode_image(&bytes).unwrap();

        assert_eq!((decoded.width, decoded.height, decoded.channels), (24, 16, 3));
        for (orig, got) in data.iter().zip(&decoded.data) {
            assert!((*orig as i32 - *got as i32).abs() <= 1, "{} vs {}", orig, got);
        }
    }

    #[test]
    fn test_depth_hint_is_single_channel() {
        let image = HostImage::filled(4, 4, &[0.5, 0.5, 0.5], SampleRange::Unit);
        let tensor = encode_image(&image, 0, 4, 4, Some("depth")).unwrap();
        assert_eq!(tensor.header.channels, 1);
        assert_eq!(tensor.payload.len(), 4 * 4 * 2);

        let tensor = encode_image(&image, 0, 4, 4, Some("color")).unwrap();
        assert_eq!(tensor.header.channels, 3);
    }

    #[test]
    fn test_pose_maps_into_upper_half() {
        let data = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let image = HostImage::new(1, 1, 2, 3, SampleRange::Unit, data).unwrap();
        let samples = f16_samples(&encode_image(&image, 0, 2, 1, Some("pose")).unwrap());
        // 0.5 -> byte 127 -> ~-0.004, 1.0 -> byte 255 -> 1.0
        assert!(samples[..3].iter().all(|&v| v.abs() < 0.01));
        assert!(samples[3..].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_pose_range_spans_the_batch() {
        // frame 0 is uniform; its level only makes sense against frame 1
        let mut data = vec![100.0; 2 * 2 * 3];
        data.extend([0.0, 0.0, 0.0, 200.0, 200.0, 200.0, 0.0, 0.0, 0.0, 200.0, 200.0, 200.0]);
        let image = HostImage::new(2, 2, 2, 3, SampleRange::Byte, data).unwrap();

        let first = encode_image(&image, 0, 2, 2, Some("pose")).unwrap();
        assert_eq!(first.header.channels, 3);
        // (100 - 0) / 200 = 0.5 -> 0.75 -> byte 191
        let bytes: Vec<u8> = f16_samples(&first).iter().map(|&v| sample_to_byte(v)).collect();
        assert!(bytes.iter().all(|&b| b == 191), "{:?}", bytes);
    }

    #[test]
    fn test_pose_normalizes_after_resize() {
        // the bright column is cropped away, so it must not set the maximum
        let mut data = Vec::new();
        for _ in 0..2 {
            data.extend([255.0, 255.0, 255.0]);
            data.extend([0.0, 0.0, 0.0]);
            data.extend([100.0, 100.0, 100.0]);
            data.extend([0.0, 0.0, 0.0]);
        }
        let image = HostImage::new(1, 2, 4, 3, SampleRange::Byte, data).unwrap();
        let tensor = encode_image(&image, 0, 2, 2, Some("pose")).unwrap();
        let bytes: Vec<u8> = f16_samples(&tensor).iter().map(|&v| sample_to_byte(v)).collect();
        // cropped columns are [0, 100]: 0 -> 0.5, 100 -> 1.0
        assert_eq!(&bytes[..6], &[127, 127, 127, 255, 255, 255]);
    }

    #[test]
    fn test_center_crop_without_scaling() {
        // 4 wide, 2 high; each column holds its index
        let mut data = Vec::new();
        for _ in 0..2 {
            for x in 0..4 {
                data.push(x as f32 * 60.0);
            }
        }
        let image = HostImage::new(1, 2, 4, 1, SampleRange::Byte, data).unwrap();
        let tensor = encode_image(&image, 0, 2, 2, None).unwrap();
        let samples = f16_samples(&tensor);
        let bytes: Vec<u8> = samples.iter().map(|&v| sample_to_byte(v)).collect();
        assert_eq!(bytes, vec![60, 120, 60, 120]);
    }

    #[test]
    fn test_resize_covers_target() {
        let image = DynamicImage::new_rgb8(100, 50);
        let out = resize_crop(image, 64, 64).unwrap();
        assert_eq!(out.dimensions(), (64, 64));

        let image = DynamicImage::new_rgb8(30, 90);
        let out = resize_crop(image, 128, 64).unwrap();
        assert_eq!(out.dimensions(), (128, 64));
    }

    #[test]
    fn test_batch_index_selects_frame() {
        let mut data = vec![0.0; 3];
        data.extend([255.0; 3]);
        let image = HostImage::new(2, 1, 1, 3, SampleRange::Byte, data).unwrap();
        let second = f16_samples(&encode_image(&image, 1, 1, 1, None).unwrap());
        assert!(second.iter().all(|&v| v == 1.0));
        assert!(encode_image(&image, 2, 1, 1, None).is_err());
    }

    #[test]
    fn test_mask_quantization() {
        let data = vec![0.0, 0.1, 0.19, 0.2, 0.5, 1.0];
        let mask = HostMask::new(1, 1, 6, data).unwrap();
        let tensor = encode_mask(&mask, 0, 6, 1).unwrap();

        assert_eq!(tensor.header.element_type, ElementType::U8);
        assert_eq!(tensor.header.layout, TensorLayout::Nchw);
        assert_eq!(tensor.header.channels, 1);
        // 0.19 -> 48, 0.2 -> 51
        assert_eq!(tensor.payload, vec![0, 0, 0, 2, 2, 2]);
    }

    #[test]
    fn test_nan_frame_is_corrupt() {
        let header = WireTensorHeader::new(TensorLayout::Nhwc, ElementType::F16, 1, 2, 3);
        let mut payload = Vec::new();
        payload.extend(f16::NAN.to_bits().to_le_bytes());
        payload.extend([0u8; 10]);
        let bytes = WireTensor { header, payload }.encode().unwrap();

        assert!(matches!(decode_samples(&bytes), Err(BridgeError::CorruptFrame)));
        assert!(matches!(decode_image(&bytes), Err(BridgeError::CorruptFrame)));
    }

    #[test]
    fn test_compressed_payload_decodes_like_raw() {
        let image = HostImage::filled(8, 8, &[0.25, 0.5, 0.75, 1.0], SampleRange::Unit);
        let tensor = encode_image(&image, 0, 8, 8, None).unwrap();

        let raw = decode_image(&tensor.encode().unwrap()).unwrap();
        let packed = decode_image(&tensor.encode_compressed().unwrap()).unwrap();
        assert_eq!(raw, packed);
        assert!(raw.has_alpha());
        assert_eq!(&raw.data[..4], &[63, 127, 191, 255]);
    }

    #[test]
    fn test_quantization_truncates() {
        // 49.9 / 255 stays below the mask threshold
        let mask = HostMask::new(1, 1, 2, vec![49.9 / 255.0, 50.5 / 255.0]).unwrap();
        assert_eq!(encode_mask(&mask, 0, 2, 1).unwrap().payload, vec![MASK_RETAIN, MASK_REGENERATE]);

        assert_eq!(SampleRange::Unit.quantize(0.999), 254);
        assert_eq!(SampleRange::Byte.quantize(127.9), 127);
        assert_eq!(SampleRange::Byte.quantize(300.0), 255);
        assert_eq!(SampleRange::Unit.quantize(f32::NAN), 0);
    }

    #[test]
    fn test_sample_to_byte_clamps() {
        assert_eq!(sample_to_byte(-1.0), 0);
        assert_eq!(sample_to_byte(1.0), 255);
        assert_eq!(sample_to_byte(0.0), 128);
        assert_eq!(sample_to_byte(3.0), 255);
        assert_eq!(sample_to_byte(-7.0), 0);
    }
}
