/*
 *  lib.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Event bus, classifier, pollers and album art pipeline behind a
 *	smart control panel
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

pub mod artwork;
pub mod baseline;
pub mod broker;
pub mod cadence;
pub mod classifier;
pub mod clock;
pub mod commands;
pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod event;
pub mod homeassistant;
pub mod poller;
pub mod presentation;
pub mod topics;
pub mod update;
pub mod weather;

pub use event::{BusError, Event, EventBus, EventKind, Payload, PresentationEvents, SystemEvents};
pub use update::{ImageHandle, IntField, PresentationUpdate, TextField};
