//! Connected radio handle.
//!
//! One [`RadioLink`] owns one transport. Commands are serialized: the
//! command mutex admits one exchange at a time, and every exchange is
//! bounded by a response deadline. Pushes are routed to the receiver the
//! daemon obtained at connect time and never interleave with responses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::protocol::{self, Command, IncomingMessage, Push, RadioContact, Response, SelfInfo};
use crate::transport::FrameIo;
use crate::{RadioError, Result};

/// Deadline for a single command/response exchange.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Returned by a DM send: the echo code the radio expects back, and its
/// suggested wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentInfo {
    pub ack_code: u32,
    pub suggested_timeout_ms: u32,
}

/// Outcome of a private-key export attempt. `Disabled` is an expected
/// firmware policy, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyExport {
    Key(Vec<u8>),
    Disabled,
}

/// A message handed over by the radio's own receive queue.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioMessage {
    Contact(IncomingMessage),
    Channel {
        channel_idx: u8,
        txt_type: u8,
        sender_timestamp: u32,
        text: String,
    },
}

pub struct RadioLink {
    cmd_lock: Mutex<mpsc::Receiver<Response>>,
    outgoing: mpsc::Sender<Vec<u8>>,
    connected: Arc<AtomicBool>,
    self_info: std::sync::Mutex<Option<SelfInfo>>,
}

impl RadioLink {
    /// Take ownership of a transport, start the frame router, and run the
    /// app-start handshake. Returns the link and the push stream.
    pub async fn connect(io: FrameIo) -> Result<(Arc<Self>, mpsc::Receiver<Push>)> {
        let FrameIo {
            mut incoming,
            outgoing,
        } = io;

        let (response_tx, response_rx) = mpsc::channel::<Response>(64);
        let (push_tx, push_rx) = mpsc::channel::<Push>(256);
        let connected = Arc::new(AtomicBool::new(true));

        let connected_flag = connected.clone();
        tokio::spawn(async move {
            while let Some(frame) = incoming.recv().await {
                if protocol::is_push(&frame) {
                    match Push::decode(&frame) {
                        Ok(push) => {
                            if push_tx.send(push).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!("Dropping bad push frame: {e}"),
                    }
                } else {
                    match Response::decode(&frame) {
                        Ok(response) => {
                            if response_tx.send(response).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!("Dropping bad response frame: {e}"),
                    }
                }
            }
            tracing::debug!("Radio frame router stopped");
            connected_flag.store(false, Ordering::SeqCst);
        });

        let link = Arc::new(Self {
            cmd_lock: Mutex::new(response_rx),
            outgoing,
            connected,
            self_info: std::sync::Mutex::new(None),
        });

        // Handshake: a radio that answers app-start with self-info is ours.
        let info = match link.command(Command::AppStart).await? {
            Response::SelfInfo(info) => info,
            other => {
                return Err(RadioError::Protocol(format!(
                    "unexpected app-start reply: {other:?}"
                )))
            }
        };
        tracing::info!(
            "Radio identified: {} ({}...)",
            info.name,
            &info.public_key_hex()[..12]
        );
        if let Ok(mut slot) = link.self_info.lock() {
            *slot = Some(info);
        }

        Ok((link, push_rx))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The identity captured during the handshake.
    pub fn self_info(&self) -> Option<SelfInfo> {
        self.self_info.lock().ok().and_then(|slot| slot.clone())
    }

    fn refresh_self_info(&self, info: SelfInfo) {
        if let Ok(mut slot) = self.self_info.lock() {
            *slot = Some(info);
        }
    }

    /// Run one command/response exchange.
    async fn command(&self, cmd: Command) -> Result<Response> {
        let mut responses = self.cmd_lock.lock().await;
        self.send(cmd).await?;
        self.recv(&mut responses).await
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        if !self.is_connected() {
            return Err(RadioError::Disconnected);
        }
        self.outgoing
            .send(cmd.encode())
            .await
            .map_err(|_| RadioError::Disconnected)
    }

    async fn recv(&self, responses: &mut mpsc::Receiver<Response>) -> Result<Response> {
        match timeout(RESPONSE_TIMEOUT, responses.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(RadioError::Disconnected)
            }
            Err(_) => Err(RadioError::Timeout),
        }
    }

    fn expect_ok(response: Response) -> Result<()> {
        match response {
            Response::Ok => Ok(()),
            Response::Error { code } => Err(RadioError::Command(code)),
            other => Err(RadioError::Protocol(format!("unexpected reply: {other:?}"))),
        }
    }

    /// Re-run the app-start handshake, refreshing the cached self-info
    /// (needed after name/params writes, which only touch flash).
    pub async fn refresh_info(&self) -> Result<SelfInfo> {
        match self.command(Command::AppStart).await? {
            Response::SelfInfo(info) => {
                self.refresh_self_info(info.clone());
                Ok(info)
            }
            Response::Error { code } => Err(RadioError::Command(code)),
            other => Err(RadioError::Protocol(format!("unexpected reply: {other:?}"))),
        }
    }

    /// Fetch the radio's whole in-flash contact table.
    pub async fn get_contacts(&self) -> Result<Vec<RadioContact>> {
        let mut responses = self.cmd_lock.lock().await;
        self.send(Command::GetContacts).await?;

        let mut contacts = Vec::new();
        loop {
            match self.recv(&mut responses).await? {
                Response::ContactsStart { count } => {
                    contacts.reserve(count as usize);
                }
                Response::Contact(contact) => contacts.push(contact),
                Response::EndOfContacts => break,
                Response::Error { code } => return Err(RadioError::Command(code)),
                other => {
                    return Err(RadioError::Protocol(format!(
                        "unexpected contact-list reply: {other:?}"
                    )))
                }
            }
        }
        Ok(contacts)
    }

    /// Idempotent add-or-update of a contact in radio flash.
    pub async fn add_contact(&self, contact: &RadioContact) -> Result<()> {
        Self::expect_ok(self.command(Command::AddUpdateContact(contact.clone())).await?)
    }

    pub async fn remove_contact(&self, public_key: [u8; 32]) -> Result<()> {
        Self::expect_ok(self.command(Command::RemoveContact(public_key)).await?)
    }

    pub async fn get_channel(&self, index: u8) -> Result<Option<(String, [u8; 16])>> {
        match self.command(Command::GetChannel(index)).await? {
            Response::ChannelInfo { name, secret, .. } => Ok(Some((name, secret))),
            Response::Error { .. } => Ok(None),
            other => Err(RadioError::Protocol(format!(
                "unexpected channel reply: {other:?}"
            ))),
        }
    }

    pub async fn set_channel(&self, index: u8, name: &str, secret: [u8; 16]) -> Result<()> {
        Self::expect_ok(
            self.command(Command::SetChannel {
                index,
                name: name.to_string(),
                secret,
            })
            .await?,
        )
    }

    pub async fn set_time(&self, epoch_secs: u32) -> Result<()> {
        Self::expect_ok(self.command(Command::SetDeviceTime(epoch_secs)).await?)
    }

    pub async fn send_advert(&self, flood: bool) -> Result<()> {
        Self::expect_ok(self.command(Command::SendSelfAdvert { flood }).await?)
    }

    pub async fn export_private_key(&self) -> Result<KeyExport> {
        match self.command(Command::ExportPrivateKey).await? {
            Response::PrivateKey(key) => Ok(KeyExport::Key(key)),
            Response::Disabled => Ok(KeyExport::Disabled),
            Response::Error { code } => Err(RadioError::Command(code)),
            other => Err(RadioError::Protocol(format!(
                "unexpected key-export reply: {other:?}"
            ))),
        }
    }

    pub async fn import_private_key(&self, key: &[u8]) -> Result<()> {
        Self::expect_ok(self.command(Command::ImportPrivateKey(key.to_vec())).await?)
    }

    /// Pull the next queued message, or `None` when the queue is empty.
    pub async fn sync_next_message(&self) -> Result<Option<RadioMessage>> {
        match self.command(Command::SyncNextMessage).await? {
            Response::ContactMsgRecv(msg) => Ok(Some(RadioMessage::Contact(msg))),
            Response::ChannelMsgRecv {
                channel_idx,
                txt_type,
                sender_timestamp,
                text,
                ..
            } => Ok(Some(RadioMessage::Channel {
                channel_idx,
                txt_type,
                sender_timestamp,
                text,
            })),
            Response::NoMoreMessages => Ok(None),
            Response::Error { code } => Err(RadioError::Command(code)),
            other => Err(RadioError::Protocol(format!(
                "unexpected sync reply: {other:?}"
            ))),
        }
    }

    /// Send a direct text message. Returns the expected-ACK tracking info.
    pub async fn send_text_message(
        &self,
        pubkey_prefix: [u8; 6],
        text: &str,
        sender_timestamp: u32,
        txt_type: u8,
    ) -> Result<SentInfo> {
        let response = self
            .command(Command::SendTextMessage {
                txt_type,
                attempt: 0,
                sender_timestamp,
                pubkey_prefix,
                text: text.to_string(),
            })
            .await?;
        match response {
            Response::Sent {
                ack_code,
                suggested_timeout_ms,
            } => Ok(SentInfo {
                ack_code,
                suggested_timeout_ms,
            }),
            Response::Error { code } => Err(RadioError::Command(code)),
            other => Err(RadioError::Protocol(format!(
                "unexpected send reply: {other:?}"
            ))),
        }
    }

    pub async fn send_channel_message(
        &self,
        channel_idx: u8,
        text: &str,
        sender_timestamp: u32,
    ) -> Result<()> {
        Self::expect_ok(
            self.command(Command::SendChannelTextMessage {
                txt_type: 0,
                channel_idx,
                sender_timestamp,
                text: text.to_string(),
            })
            .await?,
        )
    }

    pub async fn set_name(&self, name: &str) -> Result<()> {
        Self::expect_ok(self.command(Command::SetAdvertName(name.to_string())).await?)
    }

    pub async fn set_coords(&self, lat: f64, lon: f64) -> Result<()> {
        Self::expect_ok(
            self.command(Command::SetAdvertLatLon {
                lat_e6: (lat * 1e6) as i32,
                lon_e6: (lon * 1e6) as i32,
            })
            .await?,
        )
    }

    pub async fn set_radio_params(&self, freq_khz: u32, bw_hz: u32, sf: u8, cr: u8) -> Result<()> {
        Self::expect_ok(
            self.command(Command::SetRadioParams {
                freq_khz,
                bw_hz,
                sf,
                cr,
            })
            .await?,
        )
    }

    pub async fn set_tx_power(&self, dbm: u8) -> Result<()> {
        Self::expect_ok(self.command(Command::SetTxPower(dbm)).await?)
    }

    pub async fn reboot(&self) -> Result<()> {
        // The radio drops the link instead of answering; best-effort.
        self.send(Command::Reboot).await
    }

    pub async fn get_telemetry(&self, pubkey_prefix: [u8; 6]) -> Result<protocol::Telemetry> {
        match self.command(Command::GetTelemetry { pubkey_prefix }).await? {
            Response::Telemetry(t) => Ok(t),
            Response::Error { code } => Err(RadioError::Command(code)),
            other => Err(RadioError::Protocol(format!(
                "unexpected telemetry reply: {other:?}"
            ))),
        }
    }

    /// Fire a trace toward a path. The result arrives as a
    /// [`Push::TraceData`] with the same tag.
    pub async fn send_trace(&self, tag: u32, path: &[u8]) -> Result<()> {
        Self::expect_ok(
            self.command(Command::SendTrace {
                tag,
                auth: 0,
                flags: 0,
                path: path.to_vec(),
            })
            .await?,
        )
    }
}
