//! Test support: a scriptable fake radio speaking the companion
//! protocol over TCP.

#![cfg(test)]

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use meshgate_radio::{transport, RadioContact, RadioLink};

use crate::handlers;
use crate::state::Gateway;

const FACE12_PRIV: &str = concat!(
    "58BA1940E97099CBB4357C62CE9C7F4B245C94C90D722E67201B989F9FEACF7B",
    "77ACADDB84438514022BDB0FC3140C2501859BE1772AC7B8C7E41DC0F40490A1",
);

/// A fake radio that answers every companion command with a canned but
/// protocol-correct reply, and records what it was asked.
pub struct FakeRadio {
    addr: std::net::SocketAddr,
    commands: Arc<Mutex<Vec<u8>>>,
    contacts: Arc<Mutex<Vec<RadioContact>>>,
}

fn reply(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![b'<'];
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn self_info_payload() -> Vec<u8> {
    let public: Vec<u8> =
        hex::decode("FACE123334789E2B81519AFDBC39A3C9EB7EA3457AD367D3243597A484847E46")
            .expect("valid hex");
    let mut body = vec![0x05];
    body.extend_from_slice(&public);
    body.push(20);
    body.push(22);
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(&906_875u32.to_le_bytes());
    body.extend_from_slice(&250_000u32.to_le_bytes());
    body.push(11);
    body.push(5);
    body.extend_from_slice(b"TestNode");
    body
}

impl FakeRadio {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let commands: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let contacts: Arc<Mutex<Vec<RadioContact>>> = Arc::new(Mutex::new(Vec::new()));

        let commands_srv = commands.clone();
        let contacts_srv = contacts.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let commands = commands_srv.clone();
                let contacts = contacts_srv.clone();
                tokio::spawn(async move {
                    serve_connection(socket, commands, contacts).await;
                });
            }
        });

        Self {
            addr,
            commands,
            contacts,
        }
    }

    /// Seed the radio-side contact table.
    pub async fn add_contact_record(&self, public_key: [u8; 32], name: &str) {
        self.contacts.lock().await.push(RadioContact {
            public_key,
            contact_type: 1,
            flags: 0,
            out_path_len: 0,
            out_path: Vec::new(),
            name: name.to_string(),
            last_advert: 0,
            lat_e6: 0,
            lon_e6: 0,
        });
    }

    /// Whether a given command code was received.
    pub async fn saw_command(&self, code: u8) -> bool {
        self.commands.lock().await.contains(&code)
    }

    /// Connect the gateway to this fake radio.
    pub async fn attach(&self, gw: &Gateway) {
        let io = transport::connect_tcp("127.0.0.1", self.addr.port())
            .await
            .expect("transport");
        let (link, pushes) = RadioLink::connect(io).await.expect("link");
        handlers::spawn_dispatcher(gw, pushes);
        gw.radio.set_link(Some(link));
        gw.radio
            .set_connection_info(Some(format!("TCP: 127.0.0.1:{}", self.addr.port())));
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    commands: Arc<Mutex<Vec<u8>>>,
    contacts: Arc<Mutex<Vec<RadioContact>>>,
) {
    let mut buf = [0u8; 2048];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);

        while pending.len() >= 3 && pending[0] == b'>' {
            let len = u16::from_le_bytes([pending[1], pending[2]]) as usize;
            if pending.len() < 3 + len {
                break;
            }
            let payload: Vec<u8> = pending[3..3 + len].to_vec();
            pending.drain(..3 + len);

            let Some(&code) = payload.first() else {
                continue;
            };
            commands.lock().await.push(code);

            for frame in respond(code, &payload, &contacts).await {
                if socket.write_all(&frame).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn respond(
    code: u8,
    payload: &[u8],
    contacts: &Arc<Mutex<Vec<RadioContact>>>,
) -> Vec<Vec<u8>> {
    match code {
        // app start
        0x01 => vec![reply(&self_info_payload())],
        // send text message -> sent with a fixed ack code
        0x02 => {
            let mut body = vec![0x06];
            body.extend_from_slice(&0xACC0DEu32.to_le_bytes());
            body.extend_from_slice(&10_000u32.to_le_bytes());
            vec![reply(&body)]
        }
        // get contacts -> start, records, end
        0x04 => {
            let table = contacts.lock().await;
            let mut frames = Vec::new();
            let mut start = vec![0x02];
            start.extend_from_slice(&(table.len() as u32).to_le_bytes());
            frames.push(reply(&start));
            for contact in table.iter() {
                let mut record = vec![0x03];
                record.extend_from_slice(&contact.encode());
                frames.push(reply(&record));
            }
            frames.push(reply(&[0x04]));
            frames
        }
        // remove contact
        0x0F => {
            if payload.len() >= 33 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&payload[1..33]);
                contacts.lock().await.retain(|c| c.public_key != key);
            }
            vec![reply(&[0x00])]
        }
        // sync next message -> queue always empty
        0x0A => vec![reply(&[0x0A])],
        // get channel -> no channels configured
        0x1A => vec![reply(&[0x01, 0x00])],
        // export private key
        0x16 => {
            let mut body = vec![0x0B];
            body.extend_from_slice(&hex::decode(FACE12_PRIV).expect("valid hex"));
            vec![reply(&body)]
        }
        // everything else succeeds
        _ => vec![reply(&[0x00])],
    }
}
