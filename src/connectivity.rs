/*
 *  connectivity.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Link supervision with exponential backoff
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
use log::{error, info, warn};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::event::{BusError, EventBus, EventKind};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_RETRIES: u32 = 15;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("link probe failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    fn event(self) -> EventKind {
        match self {
            LinkState::Disconnected => EventKind::LinkDisconnected,
            LinkState::Connecting => EventKind::LinkConnecting,
            LinkState::Connected => EventKind::LinkConnected,
        }
    }
}

/// Retry delay policy: `base * 2^attempt`, capped, with the attempt counter
/// starting over once the ceiling is hit or the link comes back.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_retries: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self { base, cap, max_retries: max_retries.max(1), attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        if self.attempt >= self.max_retries {
            warn!("reconnect ceiling of {} attempts reached, starting over", self.max_retries);
            self.attempt = 0;
        }
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES)
    }
}

/// Read side of the link state, handed to every component that does
/// network work.
#[derive(Debug, Clone)]
pub struct LinkWatch {
    rx: watch::Receiver<LinkState>,
}

impl LinkWatch {
    pub fn new(rx: watch::Receiver<LinkState>) -> Self {
        Self { rx }
    }

    /// A watch pinned to one state, for tools and tests.
    pub fn fixed(state: LinkState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    pub fn state(&self) -> LinkState {
        *self.rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Resolves once the link is up. Returns immediately if the monitor has
    /// gone away.
    pub async fn wait_connected(&mut self) {
        let _ = self.rx.wait_for(|s| *s == LinkState::Connected).await;
    }
}

pub trait LinkProbe: Send + 'static {
    fn probe(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// The link is up when a TCP connection to the backend host succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self { addr: format!("{}:{}", host, port), timeout }
    }
}

impl LinkProbe for TcpProbe {
    async fn probe(&mut self) -> Result<(), LinkError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| LinkError::Timeout(self.timeout))??;
        drop(stream);
        Ok(())
    }
}

pub struct ConnectivityMonitor<P: LinkProbe> {
    probe: P,
    bus: EventBus,
    state_tx: watch::Sender<LinkState>,
    backoff: Backoff,
    check_interval: Duration,
}

impl<P: LinkProbe> ConnectivityMonitor<P> {
    pub fn new(probe: P, bus: EventBus, backoff: Backoff, check_interval: Duration) -> (Self, LinkWatch) {
        let (state_tx, rx) = watch::channel(LinkState::Disconnected);
        let monitor = Self { probe, bus, state_tx, backoff, check_interval };
        (monitor, LinkWatch::new(rx))
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    async fn transition(&self, to: LinkState) -> Result<(), BusError> {
        let from = self.state_tx.send_replace(to);
        if from == to {
            return Ok(());
        }
        info!("link {:?} -> {:?}", from, to);
        self.bus.signal(to.event()).await
    }

    /// Run one probe cycle and return how long to wait before the next.
    pub async fn step(&mut self) -> Result<Duration, BusError> {
        if self.state() != LinkState::Connected {
            self.transition(LinkState::Connecting).await?;
        }
        match self.probe.probe().await {
            Ok(()) => {
                if self.state() != LinkState::Connected {
                    self.backoff.reset();
                    self.transition(LinkState::Connected).await?;
                }
                Ok(self.check_interval)
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!(
                    "link down ({}), retry {} in {} ms",
                    e,
                    self.backoff.attempt(),
                    delay.as_millis()
                );
                self.transition(LinkState::Disconnected).await?;
                Ok(delay)
            }
        }
    }

    pub async fn run(mut self) {
        info!("connectivity monitor started");
        loop {
            match self.step().await {
                Ok(wait) => tokio::time::sleep(wait).await,
                Err(e) => {
                    error!("connectivity monitor stopping: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedProbe {
        results: VecDeque<bool>,
    }

    impl LinkProbe for ScriptedProbe {
        async fn probe(&mut self) -> Result<(), LinkError> {
            match self.results.pop_front() {
                Some(true) => Ok(()),
                _ => Err(LinkError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))),
            }
        }
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut b = Backoff::default();
        let got: Vec<u64> = (0..7).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(got, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
        for w in got.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn test_backoff_resets_after_ceiling_and_on_reset() {
        let mut b = Backoff::new(Duration::from_millis(1000), Duration::from_millis(30_000), 15);
        for _ in 0..15 {
            b.next_delay();
        }
        assert_eq!(b.attempt(), 15);
        assert_eq!(b.next_delay(), Duration::from_millis(1000));

        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_large_attempts_do_not_overflow() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 64);
        for _ in 0..64 {
            assert!(b.next_delay() <= Duration::from_secs(30));
        }
    }

    #[tokio::test]
    async fn test_monitor_transitions_emit_events() {
        let (bus, mut sys, _pres) = EventBus::new(32);
        let probe = ScriptedProbe { results: VecDeque::from(vec![false, false, true, true, false]) };
        let (mut monitor, watch) =
            ConnectivityMonitor::new(probe, bus, Backoff::default(), Duration::from_secs(10));

        assert_eq!(monitor.step().await.unwrap(), Duration::from_millis(1000));
        assert_eq!(monitor.step().await.unwrap(), Duration::from_millis(2000));
        assert!(!watch.is_connected());

        assert_eq!(monitor.step().await.unwrap(), Duration::from_secs(10));
        assert!(watch.is_connected());
        assert_eq!(monitor.step().await.unwrap(), Duration::from_secs(10));

        // lost again: backoff starts from the base delay
        assert_eq!(monitor.step().await.unwrap(), Duration::from_millis(1000));
        assert_eq!(watch.state(), LinkState::Disconnected);

        let mut kinds = Vec::new();
        while let Some(ev) = sys.receive_system(Duration::from_millis(5)).await.unwrap() {
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::LinkConnecting,
                EventKind::LinkDisconnected,
                EventKind::LinkConnecting,
                EventKind::LinkDisconnected,
                EventKind::LinkConnecting,
                EventKind::LinkConnected,
                EventKind::LinkDisconnected,
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_connected() {
        let (tx, rx) = watch::channel(LinkState::Connecting);
        let mut link = LinkWatch::new(rx);
        let waiter = tokio::spawn(async move {
            link.wait_connected().await;
            link.is_connected()
        });
        tx.send_replace(LinkState::Connected);
        assert!(waiter.await.unwrap());
        assert!(LinkWatch::fixed(LinkState::Connected).is_connected());
    }
}
