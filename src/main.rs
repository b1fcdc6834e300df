//! Command-line entry point.
//!
//! This binary wires a [`SmartController`] to a [`TdmaEngine`] and runs it.
//! The PHY modem, radio front end, and TUN/TAP device are external
//! collaborators the stack only knows as traits (`PhyModulator`/
//! `PhyDemodulator`, `IqTransport`, `TunTap`); this binary has no production
//! implementation of any of them, so the only runnable mode is `-l`
//! (loopback), which demonstrates the full pull/assemble/transmit/capture/
//! demodulate/deliver path against the bundled `sim` doubles. Embedders who
//! have a real modem and radio should depend on this crate as a library and
//! drive `SmartController`/`TdmaEngine` directly with their own
//! implementations of those traits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn, LevelFilter};

use smartlink_radio::clock::Clock;
use smartlink_radio::config::StackConfig;
use smartlink_radio::controller::{SmartController, SmartControllerConfig};
use smartlink_radio::neighborhood::{NodeId, Neighborhood};
use smartlink_radio::sim::loopback::LoopbackTunTap;
use smartlink_radio::sim::medium::SimMedium;
use smartlink_radio::sim::phy_loopback::{LoopbackDemodulator, LoopbackModulator};
use smartlink_radio::tdma::{TdmaConfig, TdmaEngine};
use smartlink_radio::tuntap::TunTap;

#[derive(Parser, Debug)]
#[command(name = "smartlink-radio", about = "TDMA/ARQ software-defined-radio link stack")]
struct Cli {
    /// Run the bundled loopback demo (overrides node-id=1, peers=2,
    /// packets-per-slot=1, rx-thread-pool-size=1).
    #[arg(short = 'l', long = "loopback")]
    loopback: bool,

    /// This node's id (ignored in loopback mode).
    #[arg(short = 'n', long = "node-id", default_value_t = 1)]
    node_id: u8,

    /// Path to a TOML config file; falls back to built-in defaults.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Comma-separated peer node ids (ignored in loopback mode).
    #[arg(long = "peers", value_delimiter = ',')]
    peers: Vec<u8>,
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("smartlink_radio"), LevelFilter::Debug)
        .parse_default_env()
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => StackConfig::load(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => StackConfig::default(),
    };

    if cli.loopback {
        cfg.tdma.packets_per_slot = 1;
        cfg.tdma.rx_thread_pool_size = 1;
        cfg.loopback = true;
    }
    cfg.validate().context("invalid configuration")?;

    if !cli.loopback {
        anyhow::bail!(
            "no production IqTransport/PhyModulator/TunTap backend is wired into this binary; \
             run with -l/--loopback, or depend on this crate as a library and supply your own \
             transport/modem/device implementations"
        );
    }

    run_loopback_demo(&cfg)
}

/// Two in-process nodes sharing a [`SimMedium`], each with its own
/// controller and TDMA engine, demonstrating one datagram's full round trip.
fn run_loopback_demo(cfg: &StackConfig) -> anyhow::Result<()> {
    let node_a_id = NodeId(1);
    let node_b_id = NodeId(2);
    let slot_count = 2;

    info!("starting loopback demo: node {node_a_id} <-> node {node_b_id}");

    let clock = Clock::new();
    let medium = SimMedium::new();

    let node_a = LoopbackNode::spawn(node_a_id, 0, slot_count, cfg, &clock, &medium);
    let node_b = LoopbackNode::spawn(node_b_id, 1, slot_count, cfg, &clock, &medium);

    node_a.controller.queue_datagram(node_b_id, b"hello from node 1".to_vec());

    std::thread::sleep(Duration::from_secs_f64(cfg.tdma.frame_size * 4.0));

    let mut buf = [0u8; 1500];
    match node_b.tuntap.read(&mut buf) {
        Ok(n) if n > 0 => info!("node {node_b_id} egress delivered {n} bytes: {:?}", String::from_utf8_lossy(&buf[..n])),
        Ok(_) => warn!("node {node_b_id} egress saw nothing within the demo window"),
        Err(err) => warn!("node {node_b_id} tuntap read failed: {err}"),
    }

    Ok(())
}

/// One simulated node: its TUN/TAP double, controller, and TDMA engine.
/// The engine's threads run until this struct is dropped.
struct LoopbackNode {
    tuntap: Arc<LoopbackTunTap>,
    controller: Arc<SmartController>,
    _engine: TdmaEngine,
}

impl LoopbackNode {
    fn spawn(id: NodeId, my_slot: u32, slot_count: u32, cfg: &StackConfig, clock: &Clock, medium: &Arc<SimMedium>) -> Self {
        let tuntap: Arc<LoopbackTunTap> = Arc::new(LoopbackTunTap::new());
        let neighborhood = Arc::new(Neighborhood::new(id, tuntap.clone() as Arc<dyn TunTap>));
        let controller = SmartController::new(
            id,
            neighborhood,
            tuntap.clone() as Arc<dyn TunTap>,
            clock.clone(),
            SmartControllerConfig::from_stack_config(cfg),
        );

        let transport = Arc::new(smartlink_radio::sim::medium::SimTransport::new(id, Arc::clone(medium), clock.clone()));
        let demodulators = (0..cfg.tdma.rx_thread_pool_size.max(1))
            .map(|_| Box::new(LoopbackDemodulator::new()) as Box<dyn smartlink_radio::phy::PhyDemodulator>)
            .collect();

        let tdma_cfg = TdmaConfig::from_stack_config(cfg, slot_count, my_slot);
        let engine = TdmaEngine::start(
            tdma_cfg,
            clock.clone(),
            Arc::clone(&controller),
            transport,
            Box::new(LoopbackModulator::new()),
            demodulators,
        );

        Self { tuntap, controller, _engine: engine }
    }
}
