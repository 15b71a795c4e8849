/*
 *  event.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Dual channel event bus: system work and presentation updates
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
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::broker::BrokerMessage;
use crate::commands::Command;
use crate::update::PresentationUpdate;

/// Default depth of each channel.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("invalid event kind code {0}")]
    InvalidKind(u8),
    #[error("payload {payload} does not fit event {kind:?}")]
    PayloadMismatch { kind: EventKind, payload: &'static str },
    #[error("out of memory copying {0} byte payload")]
    Exhausted(usize),
    #[error("{0:?} channel closed")]
    Closed(Route),
}

/// Every event the bus understands. Discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    LinkConnected = 0,
    LinkConnecting = 1,
    LinkDisconnected = 2,
    ButtonClick = 3,
    TouchEvent = 4,
    LoadLayout = 5,
    LayoutLoaded = 6,
    RefreshLayout = 7,
    TimeSynced = 8,
    BrokerConnected = 9,
    BrokerDisconnected = 10,
    BrokerMessage = 11,
    PresentationUpdate = 12,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::LinkConnected,
        EventKind::LinkConnecting,
        EventKind::LinkDisconnected,
        EventKind::ButtonClick,
        EventKind::TouchEvent,
        EventKind::LoadLayout,
        EventKind::LayoutLoaded,
        EventKind::RefreshLayout,
        EventKind::TimeSynced,
        EventKind::BrokerConnected,
        EventKind::BrokerDisconnected,
        EventKind::BrokerMessage,
        EventKind::PresentationUpdate,
    ];

    pub fn route(self) -> Route {
        match self {
            EventKind::LayoutLoaded | EventKind::TimeSynced | EventKind::PresentationUpdate => Route::Presentation,
            _ => Route::System,
        }
    }
}

impl TryFrom<u8> for EventKind {
    type Error = BusError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        EventKind::ALL.get(code as usize).copied().ok_or(BusError::InvalidKind(code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    System,
    Presentation,
}

/// Owned event body. Moves with the event, dropped by the consumer.
#[derive(Debug)]
pub enum Payload {
    None,
    Message(BrokerMessage),
    Update(PresentationUpdate),
    Command(Command),
    Text(String),
}

impl Payload {
    /// Copy raw bytes into an owned text payload, failing cleanly when the
    /// allocation cannot be satisfied.
    pub fn copy_text(raw: &[u8]) -> Result<Payload, BusError> {
        Ok(Payload::Text(owned_string(raw)?))
    }

    fn name(&self) -> &'static str {
        match self {
            Payload::None => "none",
            Payload::Message(_) => "broker message",
            Payload::Update(_) => "presentation update",
            Payload::Command(_) => "command",
            Payload::Text(_) => "text",
        }
    }

    fn fits(&self, kind: EventKind) -> bool {
        match (kind, self) {
            (EventKind::BrokerMessage, Payload::Message(_)) => true,
            (EventKind::PresentationUpdate, Payload::Update(_)) => true,
            (EventKind::ButtonClick, Payload::Command(_) | Payload::None) => true,
            (EventKind::LoadLayout | EventKind::LayoutLoaded | EventKind::RefreshLayout, Payload::Text(_) | Payload::None) => true,
            (EventKind::BrokerMessage | EventKind::PresentationUpdate, _) => false,
            (_, Payload::None) => true,
            _ => false,
        }
    }
}

/// Copy bytes into a fresh `String` using a fallible reservation. Invalid
/// sequences become U+FFFD, sized into the reservation up front.
pub(crate) fn owned_string(raw: &[u8]) -> Result<String, BusError> {
    let needed: usize = raw
        .utf8_chunks()
        .map(|c| c.valid().len() + if c.invalid().is_empty() { 0 } else { char::REPLACEMENT_CHARACTER.len_utf8() })
        .sum();
    let mut s = String::new();
    s.try_reserve_exact(needed).map_err(|_| BusError::Exhausted(needed))?;
    for chunk in raw.utf8_chunks() {
        s.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            s.push(char::REPLACEMENT_CHARACTER);
        }
    }
    Ok(s)
}

#[derive(Debug)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Payload,
    pub enqueued_at: Instant,
}

impl Event {
    /// Time spent waiting in the channel so far.
    pub fn latency(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Producer handle. Cheap to clone, one per producer task.
#[derive(Debug, Clone)]
pub struct EventBus {
    system: mpsc::Sender<Event>,
    presentation: mpsc::Sender<Event>,
}

/// Consumer end of the system channel.
#[derive(Debug)]
pub struct SystemEvents {
    rx: mpsc::Receiver<Event>,
}

/// Consumer end of the presentation channel.
#[derive(Debug)]
pub struct PresentationEvents {
    rx: mpsc::Receiver<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (EventBus, SystemEvents, PresentationEvents) {
        let capacity = capacity.max(1);
        let (system, system_rx) = mpsc::channel(capacity);
        let (presentation, presentation_rx) = mpsc::channel(capacity);
        (
            EventBus { system, presentation },
            SystemEvents { rx: system_rx },
            PresentationEvents { rx: presentation_rx },
        )
    }

    /// Stamp and enqueue. Waits for room when the target channel is full.
    pub async fn post(&self, kind: EventKind, payload: Payload) -> Result<(), BusError> {
        if !payload.fits(kind) {
            return Err(BusError::PayloadMismatch { kind, payload: payload.name() });
        }
        let route = kind.route();
        let tx = match route {
            Route::System => &self.system,
            Route::Presentation => &self.presentation,
        };
        let event = Event { kind, payload, enqueued_at: Instant::now() };
        tx.send(event).await.map_err(|_| BusError::Closed(route))?;
        debug!("posted {:?} to {:?} channel", kind, route);
        Ok(())
    }

    /// Entry point for callers holding a raw kind code.
    pub async fn post_code(&self, code: u8, payload: Payload) -> Result<(), BusError> {
        let kind = EventKind::try_from(code)?;
        self.post(kind, payload).await
    }

    pub async fn post_update(&self, update: PresentationUpdate) -> Result<(), BusError> {
        self.post(EventKind::PresentationUpdate, Payload::Update(update)).await
    }

    pub async fn signal(&self, kind: EventKind) -> Result<(), BusError> {
        self.post(kind, Payload::None).await
    }
}

impl SystemEvents {
    /// Wait up to `timeout` for the next system event. `Ok(None)` means the
    /// wait timed out; an error means every producer is gone.
    pub async fn receive_system(&mut self, timeout: Duration) -> Result<Option<Event>, BusError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(BusError::Closed(Route::System)),
            Err(_) => Ok(None),
        }
    }
}

impl PresentationEvents {
    /// Never waits.
    pub fn try_receive_presentation(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next presentation event, `None` once every producer is gone.
    pub async fn receive(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{IntField, TextField};

    #[test]
    fn test_kind_codes_round_trip_and_reject() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::try_from(kind as u8), Ok(kind));
        }
        assert_eq!(EventKind::try_from(13), Err(BusError::InvalidKind(13)));
        assert_eq!(EventKind::try_from(255), Err(BusError::InvalidKind(255)));
    }

    #[test]
    fn test_owned_string_replaces_in_place() {
        let raw = [b'o', b'k', 0xff, 0xfe, b'!', 0xc3];
        let s = owned_string(&raw).unwrap();
        assert_eq!(s, String::from_utf8_lossy(&raw));
        assert_eq!(owned_string("Kind of Blue".as_bytes()).unwrap(), "Kind of Blue");
        assert_eq!(owned_string(&[]).unwrap(), "");
    }

    #[test]
    fn test_routing() {
        assert_eq!(EventKind::PresentationUpdate.route(), Route::Presentation);
        assert_eq!(EventKind::TimeSynced.route(), Route::Presentation);
        assert_eq!(EventKind::LayoutLoaded.route(), Route::Presentation);
        assert_eq!(EventKind::BrokerMessage.route(), Route::System);
        assert_eq!(EventKind::LinkDisconnected.route(), Route::System);
    }

    #[tokio::test]
    async fn test_fifo_per_channel() {
        let (bus, mut sys, mut pres) = EventBus::new(DEFAULT_CAPACITY);
        for v in 0..5 {
            bus.post_update(PresentationUpdate::int(IntField::Volume, v)).await.unwrap();
        }
        bus.signal(EventKind::LinkConnecting).await.unwrap();
        bus.signal(EventKind::LinkConnected).await.unwrap();

        for v in 0..5 {
            let ev = pres.try_receive_presentation().expect("queued update");
            match ev.payload {
                Payload::Update(PresentationUpdate::Int(IntField::Volume, got)) => assert_eq!(got, v),
                other => panic!("unexpected payload {:?}", other),
            }
        }
        assert!(pres.try_receive_presentation().is_none());

        let first = sys.receive_system(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = sys.receive_system(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.kind, EventKind::LinkConnecting);
        assert_eq!(second.kind, EventKind::LinkConnected);
        assert!(sys.receive_system(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_code_rejected_before_enqueue() {
        let (bus, mut sys, _pres) = EventBus::new(2);
        let err = bus.post_code(42, Payload::None).await.unwrap_err();
        assert_eq!(err, BusError::InvalidKind(42));
        assert!(sys.receive_system(Duration::from_millis(5)).await.unwrap().is_none());

        bus.post_code(EventKind::TouchEvent as u8, Payload::None).await.unwrap();
        let ev = sys.receive_system(Duration::from_millis(5)).await.unwrap().unwrap();
        assert_eq!(ev.kind, EventKind::TouchEvent);
    }

    #[tokio::test]
    async fn test_payload_must_match_kind() {
        let (bus, _sys, _pres) = EventBus::new(2);
        let err = bus.post(EventKind::PresentationUpdate, Payload::None).await.unwrap_err();
        assert!(matches!(err, BusError::PayloadMismatch { kind: EventKind::PresentationUpdate, .. }));

        let err = bus
            .post(EventKind::TimeSynced, Payload::Update(PresentationUpdate::text(TextField::Lyrics, "la")))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::PayloadMismatch { .. }));

        bus.post(EventKind::LoadLayout, Payload::copy_text(b"main").unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_post_waits_for_room() {
        let (bus, _sys, mut pres) = EventBus::new(1);
        bus.post_update(PresentationUpdate::int(IntField::Power, 1)).await.unwrap();

        let producer = bus.clone();
        let blocked = tokio::spawn(async move {
            producer.post_update(PresentationUpdate::int(IntField::Power, 2)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert!(pres.try_receive_presentation().is_some());
        blocked.await.unwrap().unwrap();
        let ev = pres.receive().await.unwrap();
        assert!(matches!(ev.payload, Payload::Update(PresentationUpdate::Int(IntField::Power, 2))));
    }

    #[tokio::test]
    async fn test_closed_system_channel_reported() {
        let (bus, mut sys, _pres) = EventBus::new(1);
        drop(bus);
        assert_eq!(
            sys.receive_system(Duration::from_millis(5)).await.unwrap_err(),
            BusError::Closed(Route::System)
        );
    }
}
