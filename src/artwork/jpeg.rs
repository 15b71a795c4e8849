/*
 *  artwork/jpeg.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	TODO:
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use jpeg_decoder::{Decoder, PixelFormat};

use super::ArtError;

const SOI: [u8; 2] = [0xFF, 0xD8];
const SOF0: u8 = 0xC0;
const SOF2: u8 = 0xC2;

/// A decoded RGB565 raster before it is handed to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u16>,
}

/// Walk the marker segments up to the first baseline or progressive frame
/// header and return `(width, height)`. Anything else is not an image we
/// can decode.
pub fn probe_dimensions(data: &[u8]) -> Result<(u16, u16), ArtError> {
    if data.len() < 2 || data[..2] != SOI {
        return Err(ArtError::NotJpeg("missing start of image marker"));
    }
    let mut i = 2;
    while i < data.len() {
        if data[i] != 0xFF {
            return Err(ArtError::NotJpeg("segment does not start with a marker"));
        }
        // fill bytes
        while i < data.len() && data[i] == 0xFF {
            i += 1;
        }
        if i >= data.len() {
            break;
        }
        let marker = data[i];
        i += 1;

        if marker == SOF0 || marker == SOF2 {
            if i + 7 > data.len() {
                return Err(ArtError::NotJpeg("truncated frame header"));
            }
            let height = u16::from_be_bytes([data[i + 3], data[i + 4]]);
            let width = u16::from_be_bytes([data[i + 5], data[i + 6]]);
            if width == 0 || height == 0 {
                return Err(ArtError::NotJpeg("zero sized frame"));
            }
            return Ok((width, height));
        }

        if i + 2 > data.len() {
            break;
        }
        let segment_len = u16::from_be_bytes([data[i], data[i + 1]]) as usize;
        if segment_len < 2 {
            return Err(ArtError::NotJpeg("bad segment length"));
        }
        i += segment_len;
    }
    Err(ArtError::NotJpeg("no frame header found"))
}

#[inline]
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Decode to RGB565, letting the decoder's DCT scaling shrink the image
/// toward `width`x`height` when asked for something smaller.
pub fn decode_rgb565(data: &[u8], width: u16, height: u16) -> Result<DecodedImage, ArtError> {
    let mut decoder = Decoder::new(data);
    decoder.read_info().map_err(|e| ArtError::Decode(e.to_string()))?;
    if width > 0 && height > 0 {
        decoder.scale(width, height).map_err(|e| ArtError::Decode(e.to_string()))?;
    }
    let raw = decoder.decode().map_err(|e| ArtError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| ArtError::Decode("decoder returned no image info".to_string()))?;

    let count = info.width as usize * info.height as usize;
    let mut pixels: Vec<u16> = Vec::new();
    pixels.try_reserve_exact(count).map_err(|_| ArtError::Exhausted(count * 2))?;

    let stride = match info.pixel_format {
        PixelFormat::L8 => 1,
        PixelFormat::L16 => 2,
        PixelFormat::RGB24 => 3,
        PixelFormat::CMYK32 => 4,
    };
    if raw.len() < count * stride {
        return Err(ArtError::Decode(format!(
            "short pixel data: {} bytes for {}x{}",
            raw.len(),
            info.width,
            info.height
        )));
    }

    for px in raw.chunks_exact(stride).take(count) {
        let value = match info.pixel_format {
            PixelFormat::L8 => rgb565(px[0], px[0], px[0]),
            // big endian, keep the high byte
            PixelFormat::L16 => rgb565(px[0], px[0], px[0]),
            PixelFormat::RGB24 => rgb565(px[0], px[1], px[2]),
            PixelFormat::CMYK32 => {
                let k = 255 - px[3] as u16;
                let ink = |c: u8| ((255 - c as u16) * k / 255) as u8;
                rgb565(ink(px[0]), ink(px[1]), ink(px[2]))
            }
        };
        pixels.push(value);
    }

    Ok(DecodedImage { width: info.width, height: info.height, pixels })
}
