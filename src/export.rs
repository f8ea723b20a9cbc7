//! Per-event pipeline: decode, optional console print, IPFIX encode, UDP
//! send. Runs entirely inside a spawned task so a stalled send never
//! delays the receive loop.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use tokio::net::UdpSocket;

use crate::config::Config;
use crate::netlink::{self, Event};
use crate::{dex, ipfix, trace};

pub struct Exporter {
    socket: Option<UdpSocket>,
    console: bool,
    /// Export sequence number, shared by all concurrent per-event tasks.
    sequence: AtomicU32,
}

impl Exporter {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let socket = match &config.collector {
            Some(addr) => {
                let socket = UdpSocket::bind("0.0.0.0:0")
                    .await
                    .context("failed to bind export socket")?;
                socket
                    .connect(addr)
                    .await
                    .with_context(|| format!("failed to resolve collector {}", addr))?;
                tracing::info!("exporting IPFIX to {}", addr);
                Some(socket)
            }
            None => None,
        };

        Ok(Exporter {
            socket,
            console: config.output,
            sequence: AtomicU32::new(0),
        })
    }

    /// Reserves the sequence number for a message carrying `records` data
    /// records and advances the shared counter by that many. One atomic
    /// add, so concurrent tasks never lose an update; the per-message
    /// unit is always the record count.
    fn claim_sequence(&self, records: u32) -> u32 {
        self.sequence.fetch_add(records, Ordering::Relaxed)
    }

    /// Handles one kernel event end to end. Decode errors propagate to
    /// the caller, which logs and drops the event.
    pub async fn handle_event(&self, event: Event) -> anyhow::Result<()> {
        let attrs = netlink::parse_attributes(&event.payload)?;
        let nodes = match event.command {
            netlink::IOAM6_EVENT_TRACE => trace::decode(&attrs)?,
            netlink::IOAM6_EVENT_DEX => vec![dex::decode(&attrs)?],
            other => {
                tracing::debug!("ignoring unexpected genetlink command {}", other);
                return Ok(());
            }
        };
        if nodes.is_empty() {
            return Ok(());
        }

        if self.console {
            for node in &nodes {
                println!("{}", node);
            }
        }

        if let Some(socket) = &self.socket {
            let sequence = self.claim_sequence(nodes.len() as u32);
            let export_time = chrono::Utc::now().timestamp() as u32;
            let message = ipfix::encode_message(&nodes, sequence, export_time)?;
            socket
                .send(&message)
                .await
                .context("failed to send IPFIX message")?;
        }

        Ok(())
    }
}
