/*
 *  presentation.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Presentation channel drain and sink interface
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
use log::{debug, info, warn};
use std::time::{Duration, Instant};

use crate::event::{EventKind, Payload, PresentationEvents};
use crate::update::PresentationUpdate;

/// A single sink call slower than this gets a warning.
pub const SLOW_HANDLER: Duration = Duration::from_millis(50);

/// Whatever draws the panel.
pub trait PresentationSink {
    fn apply(&mut self, update: &PresentationUpdate);

    fn time_synced(&mut self) {}

    fn layout_loaded(&mut self, _name: &str) {}
}

/// Times a scope and complains on drop if it ran long.
pub struct HandlerTimer {
    name: &'static str,
    start: Instant,
    limit: Duration,
}

impl HandlerTimer {
    pub fn new(name: &'static str, limit: Duration) -> Self {
        HandlerTimer { name, start: Instant::now(), limit }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for HandlerTimer {
    fn drop(&mut self) {
        let took = self.start.elapsed();
        if took > self.limit {
            warn!("{} handler took {:?}", self.name, took);
        }
    }
}

/// Hand every queued presentation event to `sink` without waiting for more.
/// Returns how many events were consumed.
pub fn drain_presentation<S: PresentationSink>(events: &mut PresentationEvents, sink: &mut S) -> usize {
    let mut count = 0;
    while let Some(event) = events.try_receive_presentation() {
        count += 1;
        debug!("{:?} waited {:?}", event.kind, event.latency());
        match (event.kind, event.payload) {
            (EventKind::PresentationUpdate, Payload::Update(update)) => {
                let _t = HandlerTimer::new("update", SLOW_HANDLER);
                sink.apply(&update);
            }
            (EventKind::TimeSynced, _) => {
                let _t = HandlerTimer::new("time sync", SLOW_HANDLER);
                sink.time_synced();
            }
            (EventKind::LayoutLoaded, payload) => {
                let name = match &payload {
                    Payload::Text(s) => s.as_str(),
                    _ => "",
                };
                let _t = HandlerTimer::new("layout", SLOW_HANDLER);
                sink.layout_loaded(name);
            }
            (kind, _) => warn!("{:?} has no presentation handler", kind),
        }
    }
    count
}

/// Stand-in sink that writes every update to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    applied: u64,
}

impl LogSink {
    pub fn applied(&self) -> u64 {
        self.applied
    }
}

impl PresentationSink for LogSink {
    fn apply(&mut self, update: &PresentationUpdate) {
        self.applied += 1;
        info!("{}", update);
    }

    fn time_synced(&mut self) {
        info!("clock synced, time display live");
    }

    fn layout_loaded(&mut self, name: &str) {
        info!("layout {} loaded", name);
    }
}
