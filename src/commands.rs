/*
 *  commands.rs
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
use log::{info, warn};
use thiserror::Error;

use crate::broker::{BrokerError, Publisher};
use crate::connectivity::LinkWatch;
use crate::homeassistant::{HomeApi, RestError};
use crate::topics::Topics;

/// A user action from the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetVolume(i32),
    Previous,
    Next,
    SetPlaying(bool),
    Monitor(bool),
    Speaker(bool),
    /// Polled power switch, numbered from 1.
    Switch { index: usize, on: bool },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("link is down, command skipped")]
    Offline,
    #[error("volume {0} outside 0..=100")]
    VolumeRange(i32),
    #[error("no switch {0}")]
    UnknownSwitch(usize),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("Home Assistant: {0}")]
    Rest(#[from] RestError),
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

/// Sends commands out through the broker or the REST service API.
#[derive(Debug, Clone)]
pub struct CommandSurface<P: Publisher, H: HomeApi> {
    publisher: P,
    ha: H,
    topics: Topics,
    switches: Vec<String>,
    link: LinkWatch,
}

impl<P: Publisher, H: HomeApi> CommandSurface<P, H> {
    pub fn new(publisher: P, ha: H, topics: Topics, switches: Vec<String>, link: LinkWatch) -> Self {
        Self { publisher, ha, topics, switches, link }
    }

    pub async fn execute(&self, command: &Command) -> Result<(), CommandError> {
        if !self.link.is_connected() {
            warn!("skipping {:?}, link is down", command);
            return Err(CommandError::Offline);
        }
        info!("executing {:?}", command);
        match *command {
            Command::SetVolume(v) => {
                if !(0..=100).contains(&v) {
                    return Err(CommandError::VolumeRange(v));
                }
                self.publisher.publish(&self.topics.volume_set, &v.to_string()).await?;
            }
            Command::Previous => self.publisher.publish(&self.topics.prev_set, "PRESS").await?,
            Command::Next => self.publisher.publish(&self.topics.next_set, "PRESS").await?,
            Command::SetPlaying(on) => self.publisher.publish(&self.topics.play_set, on_off(on)).await?,
            Command::Monitor(on) => self.publisher.publish(&self.topics.monitor_set, on_off(on)).await?,
            Command::Speaker(on) => self.publisher.publish(&self.topics.speaker_set, on_off(on)).await?,
            Command::Switch { index, on } => {
                let entity = index
                    .checked_sub(1)
                    .and_then(|i| self.switches.get(i))
                    .ok_or(CommandError::UnknownSwitch(index))?;
                let service = if on { "turn_on" } else { "turn_off" };
                self.ha.call_service("switch", service, entity).await?;
            }
        }
        Ok(())
    }
}
