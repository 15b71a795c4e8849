/*
 *  clock.rs
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
use chrono::{DateTime, Local, TimeZone};
use log::{error, info};
use std::time::Duration;

use crate::event::{EventBus, EventKind};

/// Any wall clock earlier than this (Nov 2023) has not been synced yet.
pub const SYNCED_AFTER: i64 = 1_700_000_000;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Local>;

    fn is_synced(&self) -> bool {
        is_synced(&self.now())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

pub fn is_synced<Tz: TimeZone>(now: &DateTime<Tz>) -> bool {
    now.timestamp() > SYNCED_AFTER
}

/// Poll the clock until it looks valid, then announce it once.
pub async fn watch_time_sync<C: Clock>(clock: C, bus: EventBus, interval: Duration) {
    while !clock.is_synced() {
        tokio::time::sleep(interval).await;
    }
    info!("wall clock synced: {}", clock.now().format("%Y-%m-%d %H:%M:%S"));
    if let Err(e) = bus.signal(EventKind::TimeSynced).await {
        error!("failed to post time sync: {}", e);
    }
}
