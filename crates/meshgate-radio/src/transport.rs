//! Frame-oriented transports.
//!
//! Every transport yields the same shape: a channel of complete reply
//! frames from the radio and a channel of command payloads to it. The
//! byte-level framing (see [`crate::wire`]) is handled inside the
//! transport tasks, so the link layer never sees a raw stream.
//!
//! Dropped channels mean a dead transport; the link layer treats either
//! side closing as a disconnect.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::wire::{encode_command, FrameAccumulator};
use crate::Result;

/// Channel capacity for both directions. The radio is slow; backpressure
/// beyond this indicates a stuck consumer.
const CHANNEL_CAPACITY: usize = 256;

/// A connected, frame-oriented transport.
pub struct FrameIo {
    /// Complete reply/push frames from the radio.
    pub incoming: mpsc::Receiver<Vec<u8>>,
    /// Command payloads to the radio (framing applied by the transport).
    pub outgoing: mpsc::Sender<Vec<u8>>,
}

/// Connect over TCP (a WiFi companion or a serial-over-TCP bridge).
pub async fn connect_tcp(host: &str, port: u16) -> Result<FrameIo> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    tracing::debug!("TCP transport connected to {host}:{port}");

    let (mut read_half, mut write_half) = stream.into_split();
    let (incoming_tx, incoming) = mpsc::channel(CHANNEL_CAPACITY);
    let (outgoing, mut outgoing_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut acc = FrameAccumulator::new();
        let mut buf = [0u8; 2048];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for frame in acc.push(&buf[..n]) {
                        if incoming_tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!("TCP read error: {e}");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(payload) = outgoing_rx.recv().await {
            if write_half.write_all(&encode_command(&payload)).await.is_err() {
                break;
            }
        }
    });

    Ok(FrameIo { incoming, outgoing })
}

/// Connect over a serial device.
///
/// `serialport` is blocking, so reader and writer run on plain threads
/// bridged to the async side with channels.
pub fn connect_serial(port: &str, baudrate: u32) -> Result<FrameIo> {
    let reader = serialport::new(port, baudrate)
        .timeout(Duration::from_millis(100))
        .open()?;
    let mut writer = reader.try_clone()?;
    tracing::debug!("Serial transport opened at {port} ({baudrate} baud)");

    let (incoming_tx, incoming) = mpsc::channel(CHANNEL_CAPACITY);
    let (outgoing, mut outgoing_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);

    std::thread::spawn(move || {
        let mut reader = reader;
        let mut acc = FrameAccumulator::new();
        let mut buf = [0u8; 1024];
        loop {
            match std::io::Read::read(&mut reader, &mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    for frame in acc.push(&buf[..n]) {
                        if incoming_tx.blocking_send(frame).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::debug!("Serial read error: {e}");
                    return;
                }
            }
        }
    });

    std::thread::spawn(move || {
        while let Some(payload) = outgoing_rx.blocking_recv() {
            let frame = encode_command(&payload);
            if let Err(e) = std::io::Write::write_all(&mut writer, &frame) {
                tracing::debug!("Serial write error: {e}");
                return;
            }
            let _ = std::io::Write::flush(&mut writer);
        }
    });

    Ok(FrameIo { incoming, outgoing })
}

/// Connect over BLE using a Nordic-UART-style serial service.
#[cfg(feature = "ble")]
pub async fn connect_ble(address: &str, pin: &str) -> Result<FrameIo> {
    use bluer::agent::Agent;
    use bluer::gatt::remote::Characteristic;
    use bluer::{Address, Uuid};
    use futures_util::StreamExt;

    const NUS_SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
    const NUS_RX: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
    const NUS_TX: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

    let address: Address = address
        .parse()
        .map_err(|_| crate::RadioError::Protocol(format!("invalid BLE address: {address}")))?;

    let session = bluer::Session::new().await?;

    // Answer pairing prompts with the configured PIN.
    let pin_string = pin.to_string();
    let passkey = pin.parse::<u32>().unwrap_or(0);
    let _agent = session
        .register_agent(Agent {
            request_pin_code: Some(Box::new(move |_req| {
                let pin = pin_string.clone();
                Box::pin(async move { Ok(pin) })
            })),
            request_passkey: Some(Box::new(move |_req| {
                Box::pin(async move { Ok(passkey) })
            })),
            ..Default::default()
        })
        .await?;

    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    let device = adapter.device(address)?;

    if !device.is_paired().await.unwrap_or(false) {
        if let Err(e) = device.pair().await {
            tracing::warn!("BLE pairing failed (continuing, may already trust): {e}");
        }
    }
    if !device.is_connected().await? {
        device.connect().await?;
    }
    tracing::debug!("BLE transport connected to {address}");

    let mut rx_char: Option<Characteristic> = None;
    let mut tx_char: Option<Characteristic> = None;
    for service in device.services().await? {
        if service.uuid().await? != NUS_SERVICE {
            continue;
        }
        for characteristic in service.characteristics().await? {
            match characteristic.uuid().await? {
                uuid if uuid == NUS_RX => rx_char = Some(characteristic),
                uuid if uuid == NUS_TX => tx_char = Some(characteristic),
                _ => {}
            }
        }
    }
    let rx_char = rx_char
        .ok_or_else(|| crate::RadioError::Protocol("BLE serial RX characteristic missing".into()))?;
    let tx_char = tx_char
        .ok_or_else(|| crate::RadioError::Protocol("BLE serial TX characteristic missing".into()))?;

    let (incoming_tx, incoming) = mpsc::channel(CHANNEL_CAPACITY);
    let (outgoing, mut outgoing_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);

    let notifications = tx_char.notify().await?;
    tokio::spawn(async move {
        futures_util::pin_mut!(notifications);
        let mut acc = FrameAccumulator::new();
        while let Some(chunk) = notifications.next().await {
            for frame in acc.push(&chunk) {
                if incoming_tx.send(frame).await.is_err() {
                    return;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(payload) = outgoing_rx.recv().await {
            let frame = encode_command(&payload);
            // GATT writes are MTU-bounded; chunk conservatively.
            for chunk in frame.chunks(180) {
                if rx_char.write(chunk).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok(FrameIo { incoming, outgoing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MARKER_REPLY;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_transport_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            // Expect one framed command, then answer with one reply frame.
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.expect("read");
            assert_eq!(buf[0], b'>');
            let reply = [MARKER_REPLY, 0x01, 0x00, 0x42];
            socket.write_all(&reply).await.expect("write");
            n
        });

        let mut io = connect_tcp("127.0.0.1", addr.port()).await.expect("connect");
        io.outgoing.send(vec![0x01]).await.expect("send");

        let frame = io.incoming.recv().await.expect("frame");
        assert_eq!(frame, vec![0x42]);

        let sent = server.await.expect("server");
        // marker + len + one payload byte
        assert_eq!(sent, 4);
    }

    #[tokio::test]
    async fn test_tcp_disconnect_closes_incoming() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            drop(socket);
        });

        let mut io = connect_tcp("127.0.0.1", addr.port()).await.expect("connect");
        assert_eq!(io.incoming.recv().await, None);
    }
}
