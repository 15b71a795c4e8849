/*
 *  artwork/fetch.rs
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
use log::debug;
use reqwest::{Client, header};
use std::future::Future;
use std::time::Duration;

use super::ArtError;

/// Buffer size used when the proxy does not announce a content length,
/// and the step the buffer grows by afterwards.
pub const CHUNK_GROWTH: usize = 50 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BYTES: usize = 2 * 1024 * 1024;

/// Source of encoded image bytes.
pub trait ImageFetch: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ArtError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpImageFetch {
    client: Client,
    max_bytes: usize,
}

impl HttpImageFetch {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, ArtError> {
        const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Accept", header::HeaderValue::from_static("image/jpeg"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, max_bytes })
    }
}

impl ImageFetch for HttpImageFetch {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArtError::Status(status.as_u16()));
        }

        let initial = match response.content_length() {
            Some(n) => n as usize,
            None => CHUNK_GROWTH,
        };
        if initial > self.max_bytes {
            return Err(ArtError::TooLarge(initial));
        }
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(initial).map_err(|_| ArtError::Exhausted(initial))?;

        while let Some(chunk) = response.chunk().await? {
            let needed = buf.len() + chunk.len();
            if needed > self.max_bytes {
                return Err(ArtError::TooLarge(needed));
            }
            if buf.capacity() < needed {
                let grow = chunk.len().max(CHUNK_GROWTH);
                buf.try_reserve(grow).map_err(|_| ArtError::Exhausted(buf.len() + grow))?;
            }
            buf.extend_from_slice(&chunk);
        }

        if buf.is_empty() {
            return Err(ArtError::Empty);
        }
        debug!("fetched {} bytes from {}", buf.len(), url);
        Ok(buf)
    }
}
