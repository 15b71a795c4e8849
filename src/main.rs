/*
 *  main.rs
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
use anyhow::Context;
use env_logger::Env;
use log::info;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::MissedTickBehavior;

use panelbus::artwork::{HttpImageFetch, pipeline};
use panelbus::broker::BrokerLink;
use panelbus::cadence::Cadence;
use panelbus::classifier::Classifier;
use panelbus::clock::{SystemClock, watch_time_sync};
use panelbus::commands::CommandSurface;
use panelbus::config::{self, Config};
use panelbus::connectivity::{Backoff, ConnectivityMonitor, TcpProbe};
use panelbus::dispatch::SystemDispatcher;
use panelbus::event::{EventBus, PresentationEvents};
use panelbus::homeassistant::HomeAssistant;
use panelbus::poller::{EnergyJob, SwitchJob, Ticks, WeatherJob, run_cadence};
use panelbus::presentation::{LogSink, PresentationSink, drain_presentation};
use panelbus::topics::Topics;
use panelbus::weather::{OpenMeteo, WeatherRing};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Start every producer and the system dispatcher. Returns the presentation
/// side of the bus for the caller to drain.
fn start(cfg: &Config) -> anyhow::Result<PresentationEvents> {
    let (bus, system, presentation) = EventBus::new(cfg.bus.capacity);
    let topics = Topics::new(&cfg.broker.namespace, &cfg.broker.energy_topic);
    let backoff = Backoff::new(ms(cfg.link.base_ms), ms(cfg.link.cap_ms), cfg.link.max_retries);

    // link supervision
    let probe_host = cfg.link.probe_host.as_deref().unwrap_or(&cfg.broker.host);
    let probe_port = cfg.link.probe_port.unwrap_or(cfg.broker.port);
    let probe = TcpProbe::new(probe_host, probe_port, ms(cfg.link.probe_timeout_ms));
    let (monitor, link) = ConnectivityMonitor::new(
        probe,
        bus.clone(),
        backoff.clone(),
        Duration::from_secs(cfg.link.check_secs),
    );
    tokio::spawn(monitor.run());
    tokio::spawn(watch_time_sync(SystemClock, bus.clone(), Duration::from_secs(1)));

    // broker in
    let subscriptions = topics.subscriptions().into_iter().map(str::to_string).collect();
    let (broker, publisher) = BrokerLink::new(&cfg.broker, subscriptions, bus.clone(), backoff);
    tokio::spawn(broker.run(link.clone()));

    // album art
    let fetcher = HttpImageFetch::new(ms(cfg.artwork.timeout_ms), cfg.artwork.max_bytes)
        .context("building album art HTTP client")?;
    let (art, worker) = pipeline(bus.clone(), fetcher, &cfg.artwork.proxy_base, cfg.artwork.queue_capacity);
    tokio::spawn(worker.run());

    // pollers
    let ha = HomeAssistant::new(&cfg.home_assistant).context("building Home Assistant client")?;
    let ticks = Ticks::from_config(&cfg.poller);
    tokio::spawn(run_cadence(
        EnergyJob::new(ha.clone(), &cfg.home_assistant),
        Cadence::new("energy", Duration::from_secs(cfg.poller.energy_secs)),
        link.clone(),
        bus.clone(),
        ticks,
    ));
    tokio::spawn(run_cadence(
        SwitchJob::new(ha.clone(), cfg.home_assistant.switches.clone()),
        Cadence::new("switch", Duration::from_secs(cfg.poller.switch_secs)),
        link.clone(),
        bus.clone(),
        ticks,
    ));
    let forecast = OpenMeteo::new(&cfg.weather).context("building weather client")?;
    let (ring, _) = WeatherRing::new();
    tokio::spawn(run_cadence(
        WeatherJob::new(forecast, SystemClock, ring),
        Cadence::new("weather", Duration::from_secs(cfg.poller.weather_secs)),
        link.clone(),
        bus.clone(),
        ticks,
    ));

    // system channel consumer
    let commands = CommandSurface::new(publisher, ha, topics.clone(), cfg.home_assistant.switches.clone(), link);
    let classifier = Classifier::new(&topics, cfg.artwork.width, cfg.artwork.height)
        .context("building topic table")?;
    let dispatcher = SystemDispatcher::new(system, bus, classifier, art, commands, ms(cfg.bus.system_timeout_ms));
    tokio::spawn(dispatcher.run());

    Ok(presentation)
}

async fn present<S: PresentationSink>(mut events: PresentationEvents, mut sink: S, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        drain_presentation(&mut events, &mut sink);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (cfg, _cli) = config::load()?;

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level.as_str()))
        .format_timestamp_secs()
        .init();

    info!("{} live values, no chatter", env!("CARGO_PKG_NAME"));
    info!("v.{} built {} ({})", env!("CARGO_PKG_VERSION"), BUILD_DATE, BUILD_PROFILE);
    info!("broker {}:{}, Home Assistant {}", cfg.broker.host, cfg.broker.port, cfg.home_assistant.base_url);

    let presentation = start(&cfg)?;

    tokio::select! {
        _ = signal_handler() => {
            // fall out of main, the runtime drops every task
        }
        _ = present(presentation, LogSink::default(), ms(cfg.bus.drain_interval_ms)) => {}
    }

    info!("{} stopped", env!("CARGO_PKG_NAME"));
    Ok(())
}
