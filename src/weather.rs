/*
 *  weather.rs
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
use chrono::NaiveDate;
use log::{debug, info};
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::Error as JsonError;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::WeatherConfig;

/// Hours kept from each forecast.
pub const RING_HOURS: usize = 24;

const HOURLY_FIELDS: &str = "temperature_2m,weather_code,relative_humidity_2m,apparent_temperature";

// Custom error type for weather API operations.
#[derive(Debug)]
pub enum WeatherApiError {
    HttpRequestError(reqwest::Error),
    DeserializationError(JsonError),
    ApiError(u16),
    MissingData(String),
}

impl Display for WeatherApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherApiError::HttpRequestError(e) => write!(f, "HTTP request error: {}", e),
            WeatherApiError::DeserializationError(e) => write!(f, "JSON deserialization error: {}", e),
            WeatherApiError::ApiError(code) => write!(f, "Open-Meteo API error: HTTP {}", code),
            WeatherApiError::MissingData(msg) => write!(f, "Missing weather data: {}", msg),
        }
    }
}

impl std::error::Error for WeatherApiError {}

impl From<reqwest::Error> for WeatherApiError {
    fn from(err: reqwest::Error) -> Self {
        WeatherApiError::HttpRequestError(err)
    }
}

impl From<JsonError> for WeatherApiError {
    fn from(err: JsonError) -> Self {
        WeatherApiError::DeserializationError(err)
    }
}

/// Parallel hourly arrays as returned by the forecast endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HourlyForecast {
    pub time: Vec<String>,
    pub weather_code: Vec<i32>,
    pub temperature_2m: Vec<f64>,
    pub relative_humidity_2m: Vec<f64>,
    pub apparent_temperature: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: Option<RawHourly>,
}

#[derive(Debug, Deserialize)]
struct RawHourly {
    time: Option<Vec<String>>,
    weather_code: Option<Vec<i32>>,
    temperature_2m: Option<Vec<f64>>,
    relative_humidity_2m: Option<Vec<f64>>,
    apparent_temperature: Option<Vec<f64>>,
}

impl HourlyForecast {
    /// Parse a forecast body, insisting on all five arrays.
    pub fn from_json(body: &str) -> Result<Self, WeatherApiError> {
        let response: ForecastResponse = serde_json::from_str(body)?;
        let raw = response
            .hourly
            .ok_or_else(|| WeatherApiError::MissingData("hourly".to_string()))?;
        let need = |name: &str| WeatherApiError::MissingData(format!("hourly.{}", name));
        Ok(HourlyForecast {
            time: raw.time.ok_or_else(|| need("time"))?,
            weather_code: raw.weather_code.ok_or_else(|| need("weather_code"))?,
            temperature_2m: raw.temperature_2m.ok_or_else(|| need("temperature_2m"))?,
            relative_humidity_2m: raw.relative_humidity_2m.ok_or_else(|| need("relative_humidity_2m"))?,
            apparent_temperature: raw.apparent_temperature.ok_or_else(|| need("apparent_temperature"))?,
        })
    }

    /// Number of complete hours: every array must have an entry.
    pub fn len(&self) -> usize {
        self.time
            .len()
            .min(self.weather_code.len())
            .min(self.temperature_2m.len())
            .min(self.relative_humidity_2m.len())
            .min(self.apparent_temperature.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample(&self, i: usize) -> Option<HourlyWeatherSample> {
        if i >= self.len() {
            return None;
        }
        Some(HourlyWeatherSample {
            temperature: self.temperature_2m[i],
            apparent_temperature: self.apparent_temperature[i],
            weather_code: self.weather_code[i],
            humidity: self.relative_humidity_2m[i],
        })
    }

    /// Index of the entry whose timestamp falls in `hour`.
    pub fn index_for_hour(&self, hour: u32) -> Option<usize> {
        self.time
            .iter()
            .take(self.len())
            .position(|t| hour_of(t) == Some(hour))
    }
}

/// Hour field of an ISO style `YYYY-MM-DDTHH:MM` timestamp.
pub fn hour_of(timestamp: &str) -> Option<u32> {
    let (_, rest) = timestamp.split_once('T')?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HourlyWeatherSample {
    pub temperature: f64,
    pub apparent_temperature: f64,
    pub weather_code: i32,
    pub humidity: f64,
}

impl HourlyWeatherSample {
    pub fn description(&self) -> &'static str {
        weather_description(self.weather_code)
    }

    /// `"temp|apparentC"`, both truncated to whole degrees.
    pub fn temperature_text(&self) -> String {
        format!("{}|{}C", self.temperature as i32, self.apparent_temperature as i32)
    }

    pub fn humidity_text(&self) -> String {
        format!("{:.0}%", self.humidity)
    }
}

/// Writer side of the hourly ring. Each write swaps in a whole new snapshot,
/// readers always see a complete one.
#[derive(Debug)]
pub struct WeatherRing {
    tx: watch::Sender<Arc<Vec<HourlyWeatherSample>>>,
}

#[derive(Debug, Clone)]
pub struct WeatherReader {
    rx: watch::Receiver<Arc<Vec<HourlyWeatherSample>>>,
}

impl WeatherRing {
    pub fn new() -> (WeatherRing, WeatherReader) {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        (WeatherRing { tx }, WeatherReader { rx })
    }

    /// Replace the ring with the first `RING_HOURS` samples of `forecast`.
    pub fn replace(&self, forecast: &HourlyForecast) -> usize {
        let count = forecast.len().min(RING_HOURS);
        let samples: Vec<HourlyWeatherSample> = (0..count).filter_map(|i| forecast.sample(i)).collect();
        self.tx.send_replace(Arc::new(samples));
        info!("stored {} hours of weather", count);
        count
    }

    pub fn reader(&self) -> WeatherReader {
        WeatherReader { rx: self.tx.subscribe() }
    }
}

impl WeatherReader {
    pub fn snapshot(&self) -> Arc<Vec<HourlyWeatherSample>> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of an hourly forecast for one calendar day.
pub trait ForecastSource: Send + Sync + 'static {
    fn hourly(&self, date: NaiveDate) -> impl Future<Output = Result<HourlyForecast, WeatherApiError>> + Send;
}

/// Open-Meteo client.
#[derive(Debug, Clone)]
pub struct OpenMeteo {
    client: Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
    timezone: String,
}

impl OpenMeteo {
    pub fn new(cfg: &WeatherConfig) -> Result<Self, WeatherApiError> {
        const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .default_headers(headers)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        Ok(OpenMeteo {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            latitude: cfg.latitude,
            longitude: cfg.longitude,
            timezone: cfg.timezone.clone(),
        })
    }
}

impl ForecastSource for OpenMeteo {
    async fn hourly(&self, date: NaiveDate) -> Result<HourlyForecast, WeatherApiError> {
        let day = date.format("%Y-%m-%d").to_string();
        let url = format!("{}/v1/forecast", self.base_url);
        let params = [
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("start_date", day.clone()),
            ("end_date", day),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("timezone", self.timezone.clone()),
        ];
        debug!("fetching forecast for {}", date);
        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WeatherApiError::ApiError(status.as_u16()));
        }
        let body = response.text().await?;
        HourlyForecast::from_json(&body)
    }
}

/// WMO weather interpretation codes.
pub fn weather_description(code: i32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow",
        73 => "Moderate snow",
        75 => "Heavy snow",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm, slight hail",
        99 => "Thunderstorm, heavy hail",
        _ => "Unknown",
    }
}
