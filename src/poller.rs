/*
 *  poller.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Periodic state polling, one task per cadence
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
use chrono::Timelike;
use log::{debug, error, info, warn};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::baseline::{Baseline, ENERGY_EPSILON};
use crate::cadence::Cadence;
use crate::classifier::parse_finite;
use crate::clock::Clock;
use crate::config::{HomeAssistantConfig, PollerConfig};
use crate::connectivity::LinkWatch;
use crate::event::EventBus;
use crate::homeassistant::HomeApi;
use crate::update::{IntField, PresentationUpdate, TextField};
use crate::weather::{ForecastSource, WeatherRing};

/// One class of metrics fetched together.
pub trait PollJob: Send + 'static {
    fn name(&self) -> &'static str;

    /// Extra precondition on top of the link being up.
    fn ready(&self) -> bool {
        true
    }

    /// Fetch, diff against baselines and return only what changed. Failures
    /// are logged inside and never stop the other fetches in the same run.
    fn run(&mut self) -> impl Future<Output = Vec<PresentationUpdate>> + Send;
}

/// How often the loop wakes to look at the link and its deadline.
#[derive(Debug, Clone, Copy)]
pub struct Ticks {
    pub online: Duration,
    pub offline: Duration,
}

impl Ticks {
    pub fn from_config(cfg: &PollerConfig) -> Self {
        Self {
            online: Duration::from_millis(cfg.tick_ms),
            offline: Duration::from_millis(cfg.offline_tick_ms),
        }
    }
}

impl Default for Ticks {
    fn default() -> Self {
        Self { online: Duration::from_secs(1), offline: Duration::from_secs(5) }
    }
}

/// Drive one job on its cadence until the bus goes away.
pub async fn run_cadence<J: PollJob>(mut job: J, mut cadence: Cadence, link: LinkWatch, bus: EventBus, ticks: Ticks) {
    info!("{} poller every {:?}", job.name(), cadence.interval());
    loop {
        if !link.is_connected() {
            tokio::time::sleep(ticks.offline).await;
            continue;
        }
        if cadence.is_due(Instant::now()) && job.ready() {
            let started = Instant::now();
            let updates = job.run().await;
            cadence.complete(Instant::now());
            debug!("{} poll: {} changed in {:?}", job.name(), updates.len(), started.elapsed());
            for update in updates {
                if let Err(e) = bus.post_update(update).await {
                    error!("{} poller stopping: {}", job.name(), e);
                    return;
                }
            }
        }
        tokio::time::sleep(ticks.online).await;
    }
}

/// Daily cost line for an energy counter.
pub fn energy_text(kwh: f64, tariff: f64) -> String {
    format!(" #FF0000 {:.1}# #5F6777 kW##04905E ${:.2}#", kwh, kwh * tariff)
}

/// Daily and monthly energy plus indoor climate.
pub struct EnergyJob<H: HomeApi> {
    ha: H,
    daily_entity: String,
    monthly_entity: String,
    temp_entity: String,
    humidity_entity: String,
    tariff: f64,
    daily: Baseline<f64>,
    monthly: Baseline<f64>,
    indoor_temp: Baseline<String>,
    indoor_humidity: Baseline<String>,
}

impl<H: HomeApi> EnergyJob<H> {
    pub fn new(ha: H, cfg: &HomeAssistantConfig) -> Self {
        Self {
            ha,
            daily_entity: cfg.daily_energy.clone(),
            monthly_entity: cfg.monthly_energy.clone(),
            temp_entity: cfg.indoor_temp.clone(),
            humidity_entity: cfg.indoor_humidity.clone(),
            tariff: cfg.tariff,
            daily: Baseline::new(),
            monthly: Baseline::new(),
            indoor_temp: Baseline::new(),
            indoor_humidity: Baseline::new(),
        }
    }

    async fn state(&self, entity: &str) -> Option<String> {
        match self.ha.entity_state(entity).await {
            Ok(s) => Some(s),
            Err(e) => {
                error!("failed to read {}: {}", entity, e);
                None
            }
        }
    }

    async fn poll_energy(&mut self, monthly: bool, out: &mut Vec<PresentationUpdate>) {
        let (entity, field) = if monthly {
            (self.monthly_entity.clone(), TextField::MonthlyEnergy)
        } else {
            (self.daily_entity.clone(), TextField::DailyEnergy)
        };
        let Some(raw) = self.state(&entity).await else { return };
        let Some(kwh) = parse_finite(&raw) else {
            warn!("{} state {:?} is not a number", entity, raw);
            return;
        };
        let baseline = if monthly { &mut self.monthly } else { &mut self.daily };
        if baseline.changed_beyond(kwh, ENERGY_EPSILON) {
            out.push(PresentationUpdate::text(field, &energy_text(kwh, self.tariff)));
        }
    }
}

impl<H: HomeApi> PollJob for EnergyJob<H> {
    fn name(&self) -> &'static str {
        "energy"
    }

    async fn run(&mut self) -> Vec<PresentationUpdate> {
        let mut out = Vec::new();
        self.poll_energy(false, &mut out).await;
        self.poll_energy(true, &mut out).await;

        if let Some(t) = self.state(&self.temp_entity).await {
            if self.indoor_temp.changed_str(&t) {
                out.push(PresentationUpdate::text(TextField::IndoorTemp, &format!("{}°C", t)));
            }
        }
        if let Some(h) = self.state(&self.humidity_entity).await {
            if self.indoor_humidity.changed_str(&h) {
                out.push(PresentationUpdate::text(TextField::IndoorHumidity, &format!("{}%", h)));
            }
        }
        out
    }
}

/// Packed switch value: index in the high byte, on/off in the low bit.
pub fn switch_value(index: usize, on: bool) -> i32 {
    ((index as i32) << 8) | on as i32
}

pub fn switch_is_on(state: &str) -> bool {
    state == "on" || state == "ON"
}

/// The panel's power switches, numbered from 1.
pub struct SwitchJob<H: HomeApi> {
    ha: H,
    entities: Vec<String>,
    states: Vec<Baseline<bool>>,
}

impl<H: HomeApi> SwitchJob<H> {
    pub fn new(ha: H, entities: Vec<String>) -> Self {
        let states = entities.iter().map(|_| Baseline::new()).collect();
        Self { ha, entities, states }
    }
}

impl<H: HomeApi> PollJob for SwitchJob<H> {
    fn name(&self) -> &'static str {
        "switch"
    }

    async fn run(&mut self) -> Vec<PresentationUpdate> {
        let mut out = Vec::new();
        for (i, entity) in self.entities.iter().enumerate() {
            let on = match self.ha.entity_state(entity).await {
                Ok(s) => switch_is_on(&s),
                Err(e) => {
                    error!("failed to read {}: {}", entity, e);
                    continue;
                }
            };
            if self.states[i].changed(on) {
                out.push(PresentationUpdate::int(IntField::SwitchState, switch_value(i + 1, on)));
            }
        }
        out
    }
}

/// Hourly forecast into the shared ring, current hour onto the panel.
pub struct WeatherJob<W: ForecastSource, C: Clock> {
    source: W,
    clock: C,
    ring: WeatherRing,
}

impl<W: ForecastSource, C: Clock> WeatherJob<W, C> {
    pub fn new(source: W, clock: C, ring: WeatherRing) -> Self {
        Self { source, clock, ring }
    }
}

impl<W: ForecastSource, C: Clock> PollJob for WeatherJob<W, C> {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn ready(&self) -> bool {
        self.clock.is_synced()
    }

    async fn run(&mut self) -> Vec<PresentationUpdate> {
        let today = self.clock.now().date_naive();
        let forecast = match self.source.hourly(today).await {
            Ok(f) => f,
            Err(e) => {
                error!("weather fetch failed: {}", e);
                return Vec::new();
            }
        };
        self.ring.replace(&forecast);

        let hour = self.clock.now().hour();
        let Some(sample) = forecast.index_for_hour(hour).and_then(|i| forecast.sample(i)) else {
            warn!("no forecast entry for hour {}", hour);
            return Vec::new();
        };

        // sent on every good poll, the panel repaints from these after a layout load
        vec![
            PresentationUpdate::text(TextField::WeatherDesc, sample.description()),
            PresentationUpdate::text(TextField::WeatherTemp, &sample.temperature_text()),
            PresentationUpdate::text(TextField::WeatherHumidity, &sample.humidity_text()),
        ]
    }
}
