use crate::error::IngestError;
use flate2::read::ZlibDecoder;
use png::{BitDepth, ColorType, Encoder};
use std::io::Read;

/// Uncompressed or Flate-encoded pixel data of a PDF image XObject.
pub(crate) struct RawImage<'a> {
    pub data: &'a [u8],
    pub filters: &'a [String],
    pub width: u32,
    pub height: u32,
    pub color_space: Option<&'a str>,
    pub bits_per_component: Option<i64>,
    pub predictor: Option<i64>,
}

/// Re-encodes 8-bit gray, RGB or CMYK samples as PNG so OCR engines can read them.
pub(crate) fn encode_png(image: &RawImage<'_>) -> Result<Vec<u8>, IngestError> {
    let unsupported =
        |what: String| -> Result<Vec<u8>, IngestError> { Err(IngestError::ImageDecode(what)) };

    if image.bits_per_component != Some(8) {
        return unsupported(format!("{:?} bits per component", image.bits_per_component));
    }
    if image.predictor.is_some_and(|predictor| predictor > 1) {
        return unsupported(format!("predictor {:?}", image.predictor));
    }
    let channels = match image.color_space {
        Some("DeviceGray" | "CalGray") => 1,
        Some("DeviceRGB" | "CalRGB") => 3,
        Some("DeviceCMYK") => 4,
        other => return unsupported(format!("color space {other:?}")),
    };

    let samples = match image.filters {
        [] => image.data.to_vec(),
        [filter] if filter == "FlateDecode" => {
            let mut inflated = Vec::with_capacity(image.data.len() * 2);
            ZlibDecoder::new(image.data).read_to_end(&mut inflated)?;
            inflated
        }
        other => return unsupported(format!("filters {other:?}")),
    };

    let expected = image.width as usize * image.height as usize * channels;
    if expected == 0 || samples.len() < expected {
        return unsupported(format!(
            "{} sample bytes for {}x{} image",
            samples.len(),
            image.width,
            image.height
        ));
    }
    let samples = &samples[..expected];

    let (color, pixels) = match channels {
        1 => (ColorType::Grayscale, samples.to_vec()),
        3 => (ColorType::Rgb, samples.to_vec()),
        _ => (ColorType::Rgb, cmyk_to_rgb(samples)),
    };

    let mut png = Vec::new();
    let mut encoder = Encoder::new(&mut png, image.width, image.height);
    encoder.set_color(color);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(encoding_error)?;
    writer.write_image_data(&pixels).map_err(encoding_error)?;
    writer.finish().map_err(encoding_error)?;
    Ok(png)
}

fn encoding_error(error: png::EncodingError) -> IngestError {
    IngestError::ImageDecode(error.to_string())
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(4)
        .flat_map(|pixel| {
            let black = 255 - u16::from(pixel[3]);
            pixel[..3]
                .iter()
                .map(move |ink| ((255 - u16::from(*ink)) * black / 255) as u8)
        })
        .collect()
}
