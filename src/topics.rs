/*
 *  topics.rs
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

pub const DEFAULT_NAMESPACE: &str = "esp32_music_player";
pub const DEFAULT_ENERGY_TOPIC: &str = "tele/tasmota_A0DA50/SENSOR";

/// Broker topic names for one media player namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub lyrics: String,
    pub song: String,
    pub artist: String,
    pub position: String,
    pub volume: String,
    pub progress: String,
    pub energy: String,
    pub cover_url: String,
    pub play_state: String,

    // outbound
    pub volume_set: String,
    pub prev_set: String,
    pub next_set: String,
    pub play_set: String,
    pub monitor_set: String,
    pub speaker_set: String,
}

impl Topics {
    pub fn new(namespace: &str, energy_topic: &str) -> Self {
        let sensor = |leaf: &str| format!("homeassistant/sensor/{}/{}/state", namespace, leaf);
        let number = |leaf: &str| format!("homeassistant/number/{}/{}/state", namespace, leaf);
        Topics {
            lyrics: sensor("lyrics"),
            song: sensor("song"),
            artist: sensor("artist"),
            position: number("position"),
            volume: number("volume"),
            progress: sensor("progress"),
            energy: energy_topic.to_string(),
            cover_url: sensor("url"),
            play_state: format!("homeassistant/switch/{}/play/state", namespace),
            volume_set: format!("homeassistant/number/{}/volume/set", namespace),
            prev_set: format!("homeassistant/button/{}/prev/set", namespace),
            next_set: format!("homeassistant/button/{}/next/set", namespace),
            play_set: format!("homeassistant/switch/{}/play/set", namespace),
            monitor_set: "homeassistant/switch/monitor/set".to_string(),
            speaker_set: "homeassistant/switch/speaker/set".to_string(),
        }
    }

    /// Everything the broker adapter subscribes to.
    pub fn subscriptions(&self) -> Vec<&str> {
        vec![
            self.lyrics.as_str(),
            self.song.as_str(),
            self.artist.as_str(),
            self.position.as_str(),
            self.volume.as_str(),
            self.progress.as_str(),
            self.energy.as_str(),
            self.cover_url.as_str(),
            self.play_state.as_str(),
        ]
    }

    /// Topics we publish that can come back to us.
    pub fn echoes(&self) -> Vec<&str> {
        vec![self.volume_set.as_str()]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Topics::new(DEFAULT_NAMESPACE, DEFAULT_ENERGY_TOPIC)
    }
}
