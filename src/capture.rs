//! Per-page console and network event capture.
//!
//! One consumer task per channel drains the driver's event streams into
//! the page's ring buffers. The consumers never touch the per-page
//! command gate, so capture keeps up regardless of in-flight commands.

use crate::driver::PageHandle;
use crate::logs::{ConsoleEvent, NetworkEvent, RingBuffer};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Handle to a page's running capture tasks. Dropping it detaches the
/// hooks.
pub struct Capture {
    tasks: Vec<JoinHandle<()>>,
}

impl Capture {
    /// Subscribe the page's event streams and start the consumers.
    pub async fn install(
        page: &Arc<dyn PageHandle>,
        page_id: &str,
        console: Arc<RingBuffer<ConsoleEvent>>,
        network: Arc<RingBuffer<NetworkEvent>>,
    ) -> Result<Self, crate::driver::DriverError> {
        let streams = page.subscribe().await?;
        let mut tasks = streams.forwarders;

        let id = page_id.to_string();
        let mut console_rx = streams.console;
        tasks.push(tokio::spawn(async move {
            while let Some(event) = console_rx.recv().await {
                tracing::debug!(page_id = %id, kind = event.kind.as_str(), text = %event.text,
                    "Console event captured");
                console.append(event);
            }
        }));

        let mut network_rx = streams.network;
        tasks.push(tokio::spawn(async move {
            while let Some(event) = network_rx.recv().await {
                network.append(event);
            }
        }));

        Ok(Self { tasks })
    }

    pub fn detach(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.detach();
    }
}
