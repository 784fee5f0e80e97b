//! RFCOMM transport over OS-bound serial devices.
//!
//! The operating system binds each peer's RFCOMM channel to a TTY such as
//! `/dev/rfcomm0`. This transport opens that device, frames the incoming
//! byte stream into OBEX packets and posts them on the message bus.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, GoepError, Result};
use crate::protocol::PacketDecoder;
use crate::transport::{
    ObexTransport, ServerInfo, TransportEvent, TransportEvents, TransportHandle, TransportTarget,
};
use crate::types::BdAddr;

/// Default baud rate of RFCOMM TTYs.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default packet size assumed for the peer.
pub const DEFAULT_MTU: u16 = 32_767;

/// Default number of packets queued for writing per link.
pub const DEFAULT_WRITE_QUEUE: usize = 16;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path bound to each peer, e.g. "/dev/rfcomm0".
    pub ports: HashMap<BdAddr, String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// Packet size reported as the peer MTU.
    pub mtu: u16,
    /// Packets queued per link before it reports congestion.
    pub write_queue: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            ports: HashMap::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            mtu: DEFAULT_MTU,
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

impl SerialConfig {
    /// Creates a configuration with no bound devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a peer address to a device path.
    #[must_use]
    pub fn bind(mut self, addr: BdAddr, path: impl Into<String>) -> Self {
        self.ports.insert(addr, path.into());
        self
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the MTU.
    #[must_use]
    pub const fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Sets the per-link write queue length.
    #[must_use]
    pub const fn write_queue(mut self, packets: usize) -> Self {
        self.write_queue = packets;
        self
    }
}

struct Link {
    tx: mpsc::Sender<Bytes>,
    events: TransportEvents,
    congested: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// RFCOMM transport using serial devices.
///
/// Each link runs one background task owning the device; packets reach it
/// through a bounded queue so [`ObexTransport::send`] never blocks.
pub struct SerialTransport {
    config: SerialConfig,
    links: Mutex<HashMap<TransportHandle, Link>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            links: Mutex::new(HashMap::new()),
        }
    }

    fn links(&self) -> std::sync::MutexGuard<'_, HashMap<TransportHandle, Link>> {
        // The map stays consistent even if a holder panicked
        self.links
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Runs one link until either direction fails.
    async fn run_link(
        path: String,
        baud_rate: u32,
        peer_mtu: u16,
        our_mtu: u16,
        rx: mpsc::Receiver<Bytes>,
        events: TransportEvents,
        congested: Arc<AtomicBool>,
    ) {
        let stream = match tokio_serial::new(&path, baud_rate).open_native_async() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("failed to open {}: {}", path, e);
                let _ = events.post_async(TransportEvent::Closed).await;
                return;
            }
        };
        tracing::info!("{} connected on {}", events.link(), path);

        let (reader, writer) = tokio::io::split(stream);
        if events
            .post_async(TransportEvent::Opened { peer_mtu, our_mtu })
            .await
            .is_err()
        {
            return;
        }

        let decoder = PacketDecoder::new(usize::from(our_mtu));
        let result = tokio::select! {
            r = Self::read_loop(reader, decoder, &events) => r,
            r = Self::write_loop(writer, rx, &events, &congested) => r,
        };
        if let Err(e) = result {
            tracing::debug!("{} ended: {}", events.link(), e);
        }
        let _ = events.post_async(TransportEvent::Closed).await;
    }

    /// Reads the device, posting every complete packet.
    async fn read_loop(
        mut reader: ReadHalf<SerialStream>,
        mut decoder: PacketDecoder,
        events: &TransportEvents,
    ) -> Result<()> {
        let mut buf = [0u8; 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "serial port closed",
                    )));
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("serial read error: {}", e);
                    return Err(Error::Io(e));
                }
            };

            tracing::trace!("received {} bytes", n);
            decoder.feed(&buf[..n]);

            loop {
                match decoder.decode() {
                    Ok(Some(packet)) => {
                        tracing::trace!("decoded packet: {} bytes", packet.len());
                        events.post_async(TransportEvent::Data(packet)).await?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // The decoder skips a byte and resynchronises
                        tracing::warn!("packet decode error: {}", e);
                    }
                }
            }
        }
    }

    /// Writes queued packets, lifting congestion once the queue drains.
    async fn write_loop(
        mut writer: WriteHalf<SerialStream>,
        mut rx: mpsc::Receiver<Bytes>,
        events: &TransportEvents,
        congested: &AtomicBool,
    ) -> Result<()> {
        while let Some(packet) = rx.recv().await {
            tracing::trace!("sending packet: {} bytes", packet.len());
            writer.write_all(&packet).await?;
            writer.flush().await?;

            if rx.is_empty() && congested.swap(false, Ordering::AcqRel) {
                events.post_async(TransportEvent::Congest(false)).await?;
            }
        }
        Ok(())
    }
}

impl ObexTransport for SerialTransport {
    fn open(
        &self,
        link: TransportHandle,
        info: &ServerInfo,
        events: TransportEvents,
    ) -> std::result::Result<(), GoepError> {
        if !matches!(info.target, TransportTarget::Rfcomm { .. }) {
            return Err(GoepError::TransportError(
                "L2CAP is not available over serial devices".into(),
            ));
        }
        let path = self.config.ports.get(&info.addr).cloned().ok_or_else(|| {
            GoepError::TransportError(format!("no RFCOMM device bound for {}", info.addr))
        })?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GoepError::TransportError(e.to_string()))?;

        tracing::info!("opening {} to {} via {}", link, info.addr, path);
        let (tx, rx) = mpsc::channel(self.config.write_queue.max(1));
        let congested = Arc::new(AtomicBool::new(false));
        let task = runtime.spawn(Self::run_link(
            path,
            self.config.baud_rate,
            self.config.mtu,
            info.local_mtu,
            rx,
            events.clone(),
            Arc::clone(&congested),
        ));

        self.links().insert(
            link,
            Link {
                tx,
                events,
                congested,
                task,
            },
        );
        Ok(())
    }

    fn send(&self, link: TransportHandle, packet: Bytes) -> std::result::Result<(), GoepError> {
        let links = self.links();
        let entry = links
            .get(&link)
            .ok_or_else(|| GoepError::TransportError(format!("{link} is not open")))?;

        entry
            .tx
            .try_send(packet)
            .map_err(|e| GoepError::TransportError(e.to_string()))?;

        if entry.tx.capacity() == 0 && !entry.congested.swap(true, Ordering::AcqRel) {
            tracing::debug!("{} congested", link);
            if let Err(e) = entry.events.congest(true) {
                tracing::warn!("failed to report congestion on {}: {}", link, e);
            }
        }
        Ok(())
    }

    fn close(&self, link: TransportHandle) {
        if let Some(entry) = self.links().remove(&link) {
            tracing::info!("closing {}", link);
            entry.task.abort();
        }
    }

    fn supports_l2cap(&self) -> bool {
        false
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        for (_, entry) in self.links().drain() {
            entry.task.abort();
        }
    }
}
