/*
 *  classifier.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Broker message to presentation update, by topic
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
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::artwork::AlbumArtRequest;
use crate::baseline::{Baseline, POWER_EPSILON};
use crate::broker::BrokerMessage;
use crate::topics::Topics;
use crate::update::{IntField, PresentationUpdate, TextField};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("topic {0} is handled twice")]
    DuplicateTopic(String),
    #[error("topic {0} is both handled and denied")]
    DeniedTopic(String),
}

/// Result of looking at one message.
#[derive(Debug)]
pub enum Classified {
    Update(PresentationUpdate),
    AlbumArt(AlbumArtRequest),
    /// Same as the last published value.
    Suppressed,
    /// One of our own outbound publishes coming back.
    Echo,
    Unknown,
    Malformed(String),
}

/// Last published media values plus the cover size to ask for.
#[derive(Debug, Default)]
pub struct MediaState {
    lyrics: Baseline<String>,
    song: Baseline<String>,
    artist: Baseline<String>,
    song_time: Baseline<String>,
    position: Baseline<i32>,
    volume: Baseline<i32>,
    power: Baseline<f64>,
    art_width: u16,
    art_height: u16,
}

pub type Handler = fn(&mut MediaState, &str) -> Classified;

/// Topic to handler map, checked for duplicates when built.
#[derive(Debug)]
pub struct TopicTable {
    handlers: HashMap<String, Handler>,
    denied: HashSet<String>,
}

impl TopicTable {
    pub fn build<I, D>(entries: I, denied: D) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = (String, Handler)>,
        D: IntoIterator<Item = String>,
    {
        let mut handlers = HashMap::new();
        for (topic, handler) in entries {
            if handlers.insert(topic.clone(), handler).is_some() {
                return Err(ClassifierError::DuplicateTopic(topic));
            }
        }
        let denied: HashSet<String> = denied.into_iter().collect();
        if let Some(topic) = denied.iter().find(|t| handlers.contains_key(*t)) {
            return Err(ClassifierError::DeniedTopic(topic.clone()));
        }
        Ok(Self { handlers, denied })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn text_update(baseline: &mut Baseline<String>, field: TextField, data: &str) -> Classified {
    if baseline.changed_str(data) {
        Classified::Update(PresentationUpdate::text(field, data))
    } else {
        Classified::Suppressed
    }
}

fn int_update(baseline: &mut Baseline<i32>, field: IntField, value: i32) -> Classified {
    if baseline.changed(value) {
        Classified::Update(PresentationUpdate::int(field, value))
    } else {
        Classified::Suppressed
    }
}

pub(crate) fn parse_finite(data: &str) -> Option<f64> {
    data.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn on_lyrics(state: &mut MediaState, data: &str) -> Classified {
    text_update(&mut state.lyrics, TextField::Lyrics, data)
}

fn on_song(state: &mut MediaState, data: &str) -> Classified {
    text_update(&mut state.song, TextField::SongName, data)
}

fn on_artist(state: &mut MediaState, data: &str) -> Classified {
    text_update(&mut state.artist, TextField::Artist, data)
}

fn on_progress(state: &mut MediaState, data: &str) -> Classified {
    text_update(&mut state.song_time, TextField::SongTime, data)
}

fn on_position(state: &mut MediaState, data: &str) -> Classified {
    match parse_finite(data) {
        Some(secs) => int_update(&mut state.position, IntField::PlayProgress, (secs * 100.0) as i32),
        None => Classified::Malformed(format!("position {:?}", data)),
    }
}

fn on_volume(state: &mut MediaState, data: &str) -> Classified {
    let value = match data.trim().parse::<i32>() {
        Ok(v) => Some(v),
        Err(_) => parse_finite(data).map(|v| v as i32),
    };
    match value {
        Some(v) => int_update(&mut state.volume, IntField::Volume, v),
        None => Classified::Malformed(format!("volume {:?}", data)),
    }
}

#[derive(Debug, Deserialize)]
struct Telemetry {
    #[serde(rename = "ENERGY")]
    energy: EnergyReading,
}

#[derive(Debug, Deserialize)]
struct EnergyReading {
    #[serde(rename = "Power")]
    power: f64,
}

fn on_energy(state: &mut MediaState, data: &str) -> Classified {
    let watts = match serde_json::from_str::<Telemetry>(data) {
        Ok(t) => t.energy.power,
        Err(e) => return Classified::Malformed(format!("energy telemetry: {}", e)),
    };
    if state.power.changed_beyond(watts, POWER_EPSILON) {
        Classified::Update(PresentationUpdate::int(IntField::Power, (watts * 10.0) as i32))
    } else {
        Classified::Suppressed
    }
}

fn on_cover_url(state: &mut MediaState, data: &str) -> Classified {
    match AlbumArtRequest::new(data, state.art_width, state.art_height, false) {
        Ok(request) => Classified::AlbumArt(request),
        Err(e) => Classified::Malformed(e.to_string()),
    }
}

fn on_play_state(_state: &mut MediaState, data: &str) -> Classified {
    let playing = data.trim() == "ON";
    Classified::Update(PresentationUpdate::int(IntField::PlayState, playing as i32))
}

/// Stateful message decoder. Owns every media baseline it compares against.
#[derive(Debug)]
pub struct Classifier {
    table: TopicTable,
    state: MediaState,
}

impl Classifier {
    pub fn new(topics: &Topics, art_width: u16, art_height: u16) -> Result<Self, ClassifierError> {
        let entries: Vec<(String, Handler)> = vec![
            (topics.lyrics.clone(), on_lyrics as Handler),
            (topics.song.clone(), on_song as Handler),
            (topics.artist.clone(), on_artist as Handler),
            (topics.position.clone(), on_position as Handler),
            (topics.volume.clone(), on_volume as Handler),
            (topics.progress.clone(), on_progress as Handler),
            (topics.energy.clone(), on_energy as Handler),
            (topics.cover_url.clone(), on_cover_url as Handler),
            (topics.play_state.clone(), on_play_state as Handler),
        ];
        let denied = topics.echoes().into_iter().map(str::to_string);
        let table = TopicTable::build(entries, denied)?;
        let state = MediaState { art_width, art_height, ..MediaState::default() };
        Ok(Self { table, state })
    }

    /// Decode one message. The message is consumed whatever the outcome.
    pub fn classify(&mut self, msg: BrokerMessage) -> Classified {
        if self.table.denied.contains(&msg.topic) {
            debug!("ignoring echo of our own publish on {}", msg.topic);
            return Classified::Echo;
        }
        let Some(handler) = self.table.handlers.get(msg.topic.as_str()) else {
            info!("unhandled topic {}", msg.topic);
            return Classified::Unknown;
        };
        let result = handler(&mut self.state, &msg.data);
        match &result {
            Classified::Update(u) => debug!("{} -> {}", msg.topic, u),
            Classified::AlbumArt(r) => debug!("{} -> cover {}", msg.topic, r.url),
            Classified::Malformed(why) => warn!("dropping malformed payload on {}: {}", msg.topic, why),
            _ => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> (Classifier, Topics) {
        let topics = Topics::default();
        (Classifier::new(&topics, 100, 100).unwrap(), topics)
    }

    fn msg(topic: &str, data: &str) -> BrokerMessage {
        BrokerMessage::new(topic, data)
    }

    fn int_of(c: Classified) -> Option<(IntField, i32)> {
        match c {
            Classified::Update(PresentationUpdate::Int(f, v)) => Some((f, v)),
            _ => None,
        }
    }

    #[test]
    fn test_volume_emitted_once_per_change() {
        let (mut c, t) = classifier();
        assert_eq!(int_of(c.classify(msg(&t.volume, "37"))), Some((IntField::Volume, 37)));
        assert_eq!(int_of(c.classify(msg(&t.volume, "42"))), Some((IntField::Volume, 42)));
        assert!(matches!(c.classify(msg(&t.volume, "42")), Classified::Suppressed));
        // float payload truncates to the same value
        assert!(matches!(c.classify(msg(&t.volume, "42.9")), Classified::Suppressed));
    }

    #[test]
    fn test_text_fields_byte_compared() {
        let (mut c, t) = classifier();
        let first = c.classify(msg(&t.song, "So What"));
        assert!(matches!(first, Classified::Update(PresentationUpdate::Text(TextField::SongName, ref s)) if s.as_str() == "So What"));
        assert!(matches!(c.classify(msg(&t.song, "So What")), Classified::Suppressed));
        assert!(matches!(c.classify(msg(&t.artist, "So What")), Classified::Update(_)));
        assert!(matches!(c.classify(msg(&t.song, "so what")), Classified::Update(_)));
        assert!(matches!(c.classify(msg(&t.lyrics, "")), Classified::Update(_)));
        assert!(matches!(c.classify(msg(&t.progress, "01:12 / 09:22")), Classified::Update(_)));
    }

    #[test]
    fn test_position_in_centiseconds() {
        let (mut c, t) = classifier();
        assert_eq!(int_of(c.classify(msg(&t.position, "12.345"))), Some((IntField::PlayProgress, 1234)));
        assert!(matches!(c.classify(msg(&t.position, "12.341")), Classified::Suppressed));
        assert!(matches!(c.classify(msg(&t.position, "NaN")), Classified::Malformed(_)));
    }

    #[test]
    fn test_power_epsilon() {
        let (mut c, t) = classifier();
        let body = |w: f64| format!(r#"{{"Time":"2025-06-01T10:00:00","ENERGY":{{"Total":10.1,"Power":{}}}}}"#, w);
        assert_eq!(int_of(c.classify(msg(&t.energy, &body(123.5)))), Some((IntField::Power, 1235)));
        assert!(matches!(c.classify(msg(&t.energy, &body(123.55))), Classified::Suppressed));
        assert_eq!(int_of(c.classify(msg(&t.energy, &body(125.0)))), Some((IntField::Power, 1250)));
    }

    #[test]
    fn test_malformed_leaves_baseline() {
        let (mut c, t) = classifier();
        c.classify(msg(&t.volume, "37"));
        assert!(matches!(c.classify(msg(&t.volume, "loud")), Classified::Malformed(_)));
        assert!(matches!(c.classify(msg(&t.volume, "37")), Classified::Suppressed));
        assert!(matches!(c.classify(msg(&t.energy, "{\"ENERGY\":{}}")), Classified::Malformed(_)));
        assert!(matches!(c.classify(msg(&t.energy, "not json")), Classified::Malformed(_)));
    }

    #[test]
    fn test_play_state_always_emitted() {
        let (mut c, t) = classifier();
        assert_eq!(int_of(c.classify(msg(&t.play_state, "ON"))), Some((IntField::PlayState, 1)));
        assert_eq!(int_of(c.classify(msg(&t.play_state, "ON"))), Some((IntField::PlayState, 1)));
        assert_eq!(int_of(c.classify(msg(&t.play_state, "OFF"))), Some((IntField::PlayState, 0)));
        assert_eq!(int_of(c.classify(msg(&t.play_state, "on"))), Some((IntField::PlayState, 0)));
    }

    #[test]
    fn test_cover_url_becomes_request() {
        let (mut c, t) = classifier();
        match c.classify(msg(&t.cover_url, "http://nas.local/music/a b/cover.jpg")) {
            Classified::AlbumArt(r) => {
                assert_eq!(r.url, "http://nas.local/music/a b/cover.jpg");
                assert_eq!((r.width, r.height, r.is_background), (100, 100, false));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(c.classify(msg(&t.cover_url, "")), Classified::Malformed(_)));
        let long = format!("http://x/{}", "a".repeat(600));
        assert!(matches!(c.classify(msg(&t.cover_url, &long)), Classified::Malformed(_)));
    }

    #[test]
    fn test_echo_and_unknown() {
        let (mut c, t) = classifier();
        assert!(matches!(c.classify(msg(&t.volume_set, "50")), Classified::Echo));
        assert!(matches!(c.classify(msg("homeassistant/sensor/other/state", "x")), Classified::Unknown));
        // the echo did not touch the volume baseline
        assert_eq!(int_of(c.classify(msg(&t.volume, "50"))), Some((IntField::Volume, 50)));
    }

    #[test]
    fn test_duplicate_topics_rejected() {
        let t = Topics::new("dup", "homeassistant/sensor/dup/song/state");
        assert_eq!(
            Classifier::new(&t, 100, 100).unwrap_err(),
            ClassifierError::DuplicateTopic("homeassistant/sensor/dup/song/state".to_string())
        );
        let t = Topics::new("dup", "homeassistant/number/dup/volume/set");
        assert!(matches!(Classifier::new(&t, 100, 100), Err(ClassifierError::DeniedTopic(_))));
        assert_eq!(Classifier::new(&Topics::default(), 1, 1).unwrap().table.len(), 9);
    }
}
