/*
 *  dispatch.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	System channel consumer
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
use log::{debug, error, info, trace, warn};
use std::time::Duration;

use crate::artwork::{ArtError, ArtRequester};
use crate::broker::Publisher;
use crate::classifier::{Classified, Classifier};
use crate::commands::CommandSurface;
use crate::event::{BusError, Event, EventBus, EventKind, Payload, SystemEvents};
use crate::homeassistant::HomeApi;

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(10);

pub struct SystemDispatcher<P: Publisher, H: HomeApi> {
    events: SystemEvents,
    bus: EventBus,
    classifier: Classifier,
    art: ArtRequester,
    commands: CommandSurface<P, H>,
    timeout: Duration,
}

impl<P: Publisher, H: HomeApi> SystemDispatcher<P, H> {
    pub fn new(
        events: SystemEvents,
        bus: EventBus,
        classifier: Classifier,
        art: ArtRequester,
        commands: CommandSurface<P, H>,
        timeout: Duration,
    ) -> Self {
        Self { events, bus, classifier, art, commands, timeout }
    }

    /// Wait for and handle at most one event. `Ok(false)` on an idle tick.
    pub async fn step(&mut self) -> Result<bool, BusError> {
        match self.events.receive_system(self.timeout).await? {
            Some(event) => {
                self.handle(event).await?;
                Ok(true)
            }
            None => {
                trace!("system channel idle");
                Ok(false)
            }
        }
    }

    async fn handle(&mut self, event: Event) -> Result<(), BusError> {
        debug!("{:?} waited {:?}", event.kind, event.latency());
        match (event.kind, event.payload) {
            (EventKind::BrokerMessage, Payload::Message(msg)) => match self.classifier.classify(msg) {
                Classified::Update(update) => self.bus.post_update(update).await?,
                Classified::AlbumArt(request) => match self.art.request(request).await {
                    Ok(outcome) => debug!("album art request: {:?}", outcome),
                    Err(ArtError::Bus(e)) => return Err(e),
                    Err(e) => warn!("album art request rejected: {}", e),
                },
                _ => {}
            },
            (EventKind::ButtonClick, Payload::Command(command)) => {
                if let Err(e) = self.commands.execute(&command).await {
                    error!("command {:?} failed: {}", command, e);
                }
            }
            (EventKind::ButtonClick | EventKind::TouchEvent, _) => debug!("{:?} without a command", event.kind),
            (EventKind::LoadLayout | EventKind::RefreshLayout, Payload::Text(name)) => {
                info!("{:?} {}", event.kind, name)
            }
            (kind, _) => info!("{:?}", kind),
        }
        Ok(())
    }

    /// Consume the system channel for the life of the process.
    pub async fn run(mut self) {
        info!("system dispatcher started");
        loop {
            if let Err(e) = self.step().await {
                info!("system dispatcher exiting: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artwork::{ImageFetch, pipeline};
    use crate::broker::BrokerMessage;
    use crate::commands::Command;
    use crate::commands::tests::{RecordingHome, RecordingPublisher};
    use crate::connectivity::{LinkState, LinkWatch};
    use crate::event::PresentationEvents;
    use crate::topics::Topics;
    use crate::update::{IntField, PresentationUpdate};

    struct NoFetch;

    impl ImageFetch for NoFetch {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ArtError> {
            Err(ArtError::Empty)
        }
    }

    struct Rig {
        dispatcher: SystemDispatcher<RecordingPublisher, RecordingHome>,
        bus: EventBus,
        pres: PresentationEvents,
        publisher: RecordingPublisher,
        topics: Topics,
    }

    fn rig() -> Rig {
        let (bus, sys, pres) = EventBus::new(16);
        let topics = Topics::default();
        let (art, _worker) = pipeline(bus.clone(), NoFetch, "http://proxy", 5);
        let publisher = RecordingPublisher::default();
        let commands = CommandSurface::new(
            publisher.clone(),
            RecordingHome::default(),
            topics.clone(),
            Vec::new(),
            LinkWatch::fixed(LinkState::Connected),
        );
        let classifier = Classifier::new(&topics, 100, 100).unwrap();
        let dispatcher = SystemDispatcher::new(sys, bus.clone(), classifier, art, commands, Duration::from_millis(5));
        Rig { dispatcher, bus, pres, publisher, topics }
    }

    #[tokio::test]
    async fn test_broker_message_to_update() {
        let mut r = rig();
        for v in ["37", "42", "42"] {
            let msg = BrokerMessage::new(&r.topics.volume, v);
            r.bus.post(EventKind::BrokerMessage, Payload::Message(msg)).await.unwrap();
        }
        while r.dispatcher.step().await.unwrap() {}

        let mut volumes = Vec::new();
        while let Some(ev) = r.pres.try_receive_presentation() {
            if let Payload::Update(PresentationUpdate::Int(IntField::Volume, v)) = ev.payload {
                volumes.push(v);
            }
        }
        assert_eq!(volumes, vec![37, 42]);
    }

    #[tokio::test]
    async fn test_command_executed() {
        let mut r = rig();
        r.bus.post(EventKind::ButtonClick, Payload::Command(Command::Previous)).await.unwrap();
        assert!(r.dispatcher.step().await.unwrap());
        assert_eq!(r.publisher.sent.lock().unwrap().len(), 1);
        assert!(!r.dispatcher.step().await.unwrap());
    }

    #[tokio::test]
    async fn test_cover_url_without_worker_is_not_fatal() {
        let mut r = rig();
        let msg = BrokerMessage::new(&r.topics.cover_url, "http://nas/a.jpg");
        r.bus.post(EventKind::BrokerMessage, Payload::Message(msg)).await.unwrap();
        assert!(r.dispatcher.step().await.unwrap());
        assert!(r.pres.try_receive_presentation().is_none());
    }
}
