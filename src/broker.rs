/*
 *  broker.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	MQTT adapter: subscriptions in, commands out
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
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::BrokerConfig;
use crate::connectivity::{Backoff, LinkWatch};
use crate::event::{BusError, EventBus, EventKind, Payload, owned_string};

/// Requests the client may queue ahead of the event loop.
const CLIENT_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("MQTT client error: {0}")]
    Client(#[from] ClientError),
    #[error("not connected to the broker")]
    Offline,
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// One inbound publish, copied out of the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub data: String,
    pub qos: u8,
    pub retain: bool,
}

impl BrokerMessage {
    pub fn new(topic: &str, data: &str) -> Self {
        Self { topic: topic.to_string(), data: data.to_string(), qos: 0, retain: false }
    }

    /// Copy a raw publish. Payload bytes that are not UTF-8 are replaced
    /// rather than rejected.
    pub fn from_raw(topic: &str, payload: &[u8], qos: u8, retain: bool) -> Result<Self, BusError> {
        Ok(Self { topic: owned_string(topic.as_bytes())?, data: owned_string(payload)?, qos, retain })
    }
}

/// Outbound side. Everything goes out fire-and-forget, never retained.
pub trait Publisher: Clone + Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: &str) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.client.publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec()).await?;
        debug!("published {} <- {}", topic, payload);
        Ok(())
    }
}

pub fn broker_options(cfg: &BrokerConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
    opts.set_clean_session(true);
    if let Some(user) = &cfg.username {
        opts.set_credentials(user.clone(), cfg.password.clone().unwrap_or_default());
    }
    opts
}

/// Takes its own client: `BrokerLink` is not `Sync` and must not be
/// borrowed across an await.
async fn subscribe(client: AsyncClient, filters: Vec<SubscribeFilter>) -> Result<(), BrokerError> {
    let count = filters.len();
    client.subscribe_many(filters).await?;
    info!("subscribed to {} topics", count);
    Ok(())
}

/// Owns the MQTT event loop. Subscribes on every (re)connect and forwards
/// each publish to the system channel.
pub struct BrokerLink {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: Vec<String>,
    bus: EventBus,
    backoff: Backoff,
}

impl BrokerLink {
    pub fn new(cfg: &BrokerConfig, subscriptions: Vec<String>, bus: EventBus, backoff: Backoff) -> (Self, MqttPublisher) {
        let (client, eventloop) = AsyncClient::new(broker_options(cfg), CLIENT_CAPACITY);
        let publisher = MqttPublisher { client: client.clone() };
        (Self { client, eventloop, subscriptions, bus, backoff }, publisher)
    }

    fn filters(&self) -> Vec<SubscribeFilter> {
        self.subscriptions
            .iter()
            .map(|t| SubscribeFilter::new(t.clone(), QoS::AtMostOnce))
            .collect()
    }

    pub async fn run(mut self, mut link: LinkWatch) {
        let mut connected = false;
        loop {
            if !link.is_connected() {
                link.wait_connected().await;
            }
            let step = match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("broker connected ({:?})", ack.code);
                    connected = true;
                    self.backoff.reset();
                    let filters = self.filters();
                    match subscribe(self.client.clone(), filters).await {
                        Ok(()) => self.bus.signal(EventKind::BrokerConnected).await.map_err(BrokerError::from),
                        Err(e) => Err(e),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    match BrokerMessage::from_raw(&p.topic, &p.payload, p.qos as u8, p.retain) {
                        Ok(msg) => self.bus.post(EventKind::BrokerMessage, Payload::Message(msg)).await.map_err(BrokerError::from),
                        Err(e) => {
                            warn!("dropping publish on {}: {}", p.topic, e);
                            Ok(())
                        }
                    }
                }
                Ok(_) => Ok(()),
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!("broker connection error: {}, retrying in {} ms", e, delay.as_millis());
                    let signalled = if connected {
                        connected = false;
                        self.bus.signal(EventKind::BrokerDisconnected).await.map_err(BrokerError::from)
                    } else {
                        Ok(())
                    };
                    tokio::time::sleep(delay).await;
                    signalled
                }
            };
            match step {
                Ok(()) => {}
                Err(BrokerError::Bus(e)) => {
                    error!("broker adapter stopping: {}", e);
                    break;
                }
                Err(e) => error!("{}", e),
            }
        }
    }
}
