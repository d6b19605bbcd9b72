// Peripheral runtime: the task that owns the state machine
//
// Host stack events and operator commands are funneled into one tokio task,
// so the `Peripheral` only ever sees one caller. Presentation output flows
// back to the application as `PeripheralEvent`s.

use crate::config::PeripheralConfig;
use crate::gatt::{AdvertisingError, ExchangeError};
use crate::peripheral::{Peripheral, PeripheralStatus};
use crate::transport::{PeripheralTransport, TransportEvent};
use crate::{PeripheralDelegate, PeripheralError};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Host events applied back to back before a waiting command gets a turn
const EVENT_BURST: usize = 64;

/// Commands that can be sent to the peripheral task
#[derive(Debug)]
pub enum PeripheralCommand {
    /// Notify subscribers of a characteristic
    SendNotification {
        payload: Vec<u8>,
        characteristic_id: Uuid,
        reply: mpsc::Sender<Result<usize, ExchangeError>>,
    },
    /// Operator request to start advertising
    StartAdvertising {
        reply: mpsc::Sender<Result<bool, AdvertisingError>>,
    },
    /// Operator request to stop advertising
    StopAdvertising { reply: mpsc::Sender<bool> },
    /// Snapshot of the current state
    GetStatus {
        reply: mpsc::Sender<PeripheralStatus>,
    },
    /// Stop the task
    Shutdown,
}

/// Events emitted by the peripheral to the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// Decoded text of a remote write
    Inbound(String),
    /// Human-readable state change or error
    Status(String),
    /// The transport drained its queue after reporting backpressure
    ReadyToSend,
}

/// Delegate that forwards presentation callbacks into a channel
struct ChannelDelegate {
    event_tx: mpsc::UnboundedSender<PeripheralEvent>,
}

impl ChannelDelegate {
    fn forward(&self, event: PeripheralEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("Peripheral event dropped; receiver closed");
        }
    }
}

impl PeripheralDelegate for ChannelDelegate {
    fn display_inbound(&self, text: String) {
        self.forward(PeripheralEvent::Inbound(text));
    }

    fn display_status(&self, message: String) {
        self.forward(PeripheralEvent::Status(message));
    }

    fn on_ready_to_update(&self) {
        self.forward(PeripheralEvent::ReadyToSend);
    }
}

/// Handle to communicate with the running peripheral task
#[derive(Clone)]
pub struct PeripheralHandle {
    command_tx: mpsc::Sender<PeripheralCommand>,
    characteristic_id: Uuid,
}

impl PeripheralHandle {
    /// Characteristic used by [`PeripheralHandle::send`]
    pub fn characteristic_id(&self) -> Uuid {
        self.characteristic_id
    }

    /// Whether the task is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Notify subscribers of `characteristic_id`; returns the number targeted
    pub async fn send_notification(
        &self,
        payload: Vec<u8>,
        characteristic_id: Uuid,
    ) -> Result<usize, PeripheralError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(PeripheralCommand::SendNotification {
                payload,
                characteristic_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PeripheralError::NotRunning)?;

        Ok(reply_rx
            .recv()
            .await
            .ok_or(PeripheralError::NotRunning)??)
    }

    /// Notify subscribers of the configured characteristic
    pub async fn send(&self, payload: Vec<u8>) -> Result<usize, PeripheralError> {
        self.send_notification(payload, self.characteristic_id)
            .await
    }

    pub async fn start_advertising(&self) -> Result<bool, PeripheralError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(PeripheralCommand::StartAdvertising { reply: reply_tx })
            .await
            .map_err(|_| PeripheralError::NotRunning)?;

        Ok(reply_rx
            .recv()
            .await
            .ok_or(PeripheralError::NotRunning)??)
    }

    pub async fn stop_advertising(&self) -> Result<bool, PeripheralError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(PeripheralCommand::StopAdvertising { reply: reply_tx })
            .await
            .map_err(|_| PeripheralError::NotRunning)?;

        reply_rx.recv().await.ok_or(PeripheralError::NotRunning)
    }

    pub async fn status(&self) -> Result<PeripheralStatus, PeripheralError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(PeripheralCommand::GetStatus { reply: reply_tx })
            .await
            .map_err(|_| PeripheralError::NotRunning)?;

        reply_rx.recv().await.ok_or(PeripheralError::NotRunning)
    }

    /// Shut down the peripheral task
    pub async fn shutdown(&self) -> Result<(), PeripheralError> {
        self.command_tx
            .send(PeripheralCommand::Shutdown)
            .await
            .map_err(|_| PeripheralError::NotRunning)
    }
}

/// Apply one operator command. Returns false on shutdown.
async fn apply_command(peripheral: &mut Peripheral, command: PeripheralCommand) -> bool {
    match command {
        PeripheralCommand::SendNotification {
            payload,
            characteristic_id,
            reply,
        } => {
            let result = peripheral.send_notification(&payload, characteristic_id);
            if let Err(e) = &result {
                tracing::warn!("Notification not sent: {}", e);
            }
            let _ = reply.send(result).await;
        }

        PeripheralCommand::StartAdvertising { reply } => {
            let _ = reply.send(peripheral.start_advertising()).await;
        }

        PeripheralCommand::StopAdvertising { reply } => {
            let _ = reply.send(peripheral.stop_advertising()).await;
        }

        PeripheralCommand::GetStatus { reply } => {
            let _ = reply.send(peripheral.status()).await;
        }

        PeripheralCommand::Shutdown => {
            tracing::info!("Peripheral shutting down");
            return false;
        }
    }
    true
}

/// Validate the config and spawn the peripheral task.
///
/// Must be called from within a tokio runtime. The task runs until
/// `shutdown`, until every handle is dropped, or until the transport's event
/// stream closes.
pub fn start_peripheral(
    config: PeripheralConfig,
    transport: Arc<dyn PeripheralTransport>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    event_tx: mpsc::UnboundedSender<PeripheralEvent>,
) -> Result<PeripheralHandle, PeripheralError> {
    let buffer = config.command_buffer;
    let characteristic_id = config.characteristic_uuid;
    let delegate = Arc::new(ChannelDelegate { event_tx });
    let mut peripheral = Peripheral::new(config, transport, delegate)?;

    let (command_tx, mut command_rx) = mpsc::channel::<PeripheralCommand>(buffer);
    let handle = PeripheralHandle {
        command_tx,
        characteristic_id,
    };

    tokio::spawn(async move {
        tracing::info!("Peripheral task started");
        let mut burst = 0usize;
        loop {
            // A long run of host events lets one queued command through
            if burst >= EVENT_BURST {
                burst = 0;
                if let Ok(command) = command_rx.try_recv() {
                    if !apply_command(&mut peripheral, command).await {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                // Pending host stack events are applied before any command
                biased;

                // Host stack events, in arrival order
                event = transport_events.recv() => {
                    match event {
                        Some(event) => {
                            tracing::trace!("Transport event: {}", event);
                            peripheral.handle_event(event);
                            burst += 1;
                        }
                        None => {
                            tracing::info!("Transport event stream closed");
                            break;
                        }
                    }
                }

                // Commands from the application layer
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        tracing::info!("All peripheral handles dropped");
                        break;
                    };
                    burst = 0;
                    if !apply_command(&mut peripheral, command).await {
                        break;
                    }
                }
            }
        }
    });

    Ok(handle)
}
