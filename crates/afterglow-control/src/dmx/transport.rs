//! Line-delimited JSON link to the lighting server

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::protocol::{decode_line, encode_line, DmxEcho, InboundMessage, OutboundMessage};

/// Lighting connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// State shared between the mapper and its link task.
///
/// Every connection attempt gets a new generation; a link task only reports its
/// final state while its generation is still current.
pub(crate) struct LinkShared {
    generation: Mutex<u64>,
    state: watch::Sender<ConnectionState>,
    last_echo: Mutex<Option<DmxEcho>>,
}

impl LinkShared {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            generation: Mutex::new(0),
            state,
            last_echo: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Start a new generation in `state`
    pub fn begin(&self, state: ConnectionState) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.state.send_replace(state);
        *generation
    }

    /// Update the state unless a newer generation took over
    pub fn set_for(&self, generation: u64, state: ConnectionState) {
        let current = self.generation.lock();
        if *current == generation {
            let previous = self.state.send_replace(state);
            if previous != state {
                debug!("Lighting link {} -> {}", previous, state);
            }
        }
    }

    pub fn last_echo(&self) -> Option<DmxEcho> {
        self.last_echo.lock().clone()
    }

    fn handle_inbound(&self, line: &str) {
        match decode_line(line) {
            Ok(InboundMessage::InitSuccess { universe, fixtures }) => {
                info!(
                    "Lighting server accepted universe {} with {} fixtures",
                    universe,
                    fixtures.len()
                );
            }
            Ok(InboundMessage::DmxUpdate {
                universe,
                channels,
                timestamp,
            }) => {
                debug!("DMX echo for universe {} at {}", universe, timestamp);
                *self.last_echo.lock() = Some(DmxEcho {
                    universe,
                    channels,
                    timestamp,
                });
            }
            Err(e) => warn!("Ignoring malformed lighting message: {}", e),
        }
    }
}

/// Pump outbound messages to `stream` and decode inbound lines until either side closes
pub(crate) async fn run_link<S>(
    stream: S,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    shared: Arc<LinkShared>,
    generation: u64,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    let final_state = loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Mapper dropped the link
                    let _ = write_half.shutdown().await;
                    break ConnectionState::Disconnected;
                };
                let line = match encode_line(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode {} message: {}", message.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    error!("Lighting link write failed: {}", e);
                    break ConnectionState::Error;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => shared.handle_inbound(&line),
                    Ok(None) => {
                        info!("Lighting server closed the connection");
                        break ConnectionState::Disconnected;
                    }
                    Err(e) => {
                        error!("Lighting link read failed: {}", e);
                        break ConnectionState::Error;
                    }
                }
            }
        }
    };

    shared.set_for(generation, final_state);
}
