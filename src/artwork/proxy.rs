/*
 *  artwork/proxy.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Rewrite cover URLs onto the image conversion proxy
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
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::Url;

use super::ArtError;

const CONVERT_SCRIPT: &str = "convert_music_image.php";

/// Unreserved characters plus `/`, which stays readable in the proxied path.
const PATH_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~').remove(b'/');

/// Everything after `scheme://host/`, query included, with the parser's own
/// escaping undone.
pub fn source_path(raw_url: &str) -> Result<String, ArtError> {
    let invalid = || ArtError::InvalidUrl(raw_url.to_string());
    let url = Url::parse(raw_url).map_err(|_| invalid())?;
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(invalid());
    }
    let mut path = percent_decode_str(url.path().trim_start_matches('/'))
        .decode_utf8_lossy()
        .into_owned();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(&percent_decode_str(query).decode_utf8_lossy());
    }
    if path.is_empty() {
        return Err(invalid());
    }
    Ok(path)
}

/// Percent-encode a path for use as a query value. Slashes survive.
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_VALUE).to_string()
}

/// Build the proxy request that returns `raw_url` as a `width`x`height` JPEG.
pub fn convert_url(proxy_base: &str, raw_url: &str, width: u16, height: u16) -> Result<String, ArtError> {
    let path = source_path(raw_url)?;
    Ok(format!(
        "{}/{}?music_path={}&format=jpg&width={}&height={}",
        proxy_base.trim_end_matches('/'),
        CONVERT_SCRIPT,
        encode_path(&path),
        width,
        height
    ))
}
