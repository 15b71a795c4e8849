/*
 *  update.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Presentation update payloads handed to the render layer
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
use arrayvec::ArrayString;
use std::fmt::{self, Display};
use std::sync::Arc;

/// Longest pre-formatted string an update may carry, in bytes.
pub const MAX_TEXT_LEN: usize = 256;

pub type DisplayText = ArrayString<MAX_TEXT_LEN>;

/// Copy `s` into a fixed display string, cutting on a char boundary.
pub fn display_text(s: &str) -> DisplayText {
    let mut end = s.len().min(MAX_TEXT_LEN);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = DisplayText::new();
    out.push_str(&s[..end]);
    out
}

/// Fields fed with a formatted string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    Lyrics,
    SongName,
    Artist,
    SongTime,
    DailyEnergy,
    MonthlyEnergy,
    WeatherDesc,
    WeatherTemp,
    WeatherHumidity,
    IndoorTemp,
    IndoorHumidity,
}

/// Fields fed with a raw scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntField {
    /// centiseconds
    PlayProgress,
    Volume,
    /// tenths of a watt
    Power,
    /// 1 playing, 0 paused
    PlayState,
    /// `(index << 8) | on`
    SwitchState,
}

/// Flat view over every update kind, handy for logging and routing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Text(TextField),
    Int(IntField),
    AlbumArt,
}

/// Decoded RGB565 raster. Immutable once published.
#[derive(Debug, PartialEq, Eq)]
pub struct ImageBuffer {
    pub width: u16,
    pub height: u16,
    /// Install counter of the art cache that produced this buffer.
    pub generation: u64,
    pub pixels: Vec<u16>,
}

impl ImageBuffer {
    pub fn byte_len(&self) -> usize {
        self.pixels.len() * 2
    }
}

/// Shared handle to a published image. The pixels are freed when the last
/// holder (cache slot, queued event or renderer) lets go.
pub type ImageHandle = Arc<ImageBuffer>;

/// One change for the presentation layer. The variant decides which value
/// is live, so a consumer can never read the wrong member.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationUpdate {
    Text(TextField, DisplayText),
    Int(IntField, i32),
    AlbumArt(ImageHandle),
}

impl PresentationUpdate {
    pub fn text(field: TextField, value: &str) -> Self {
        PresentationUpdate::Text(field, display_text(value))
    }

    pub fn int(field: IntField, value: i32) -> Self {
        PresentationUpdate::Int(field, value)
    }

    pub fn kind(&self) -> UpdateKind {
        match self {
            PresentationUpdate::Text(f, _) => UpdateKind::Text(*f),
            PresentationUpdate::Int(f, _) => UpdateKind::Int(*f),
            PresentationUpdate::AlbumArt(_) => UpdateKind::AlbumArt,
        }
    }
}

impl Display for PresentationUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresentationUpdate::Text(field, s) => write!(f, "{:?} = \"{}\"", field, s),
            PresentationUpdate::Int(field, v) => write!(f, "{:?} = {}", field, v),
            PresentationUpdate::AlbumArt(img) => write!(
                f,
                "AlbumArt = {}x{} gen {} ({} bytes)",
                img.width,
                img.height,
                img.generation,
                img.byte_len()
            ),
        }
    }
}
