//! Minimal SPICE server double used by the integration tests: speaks just
//! enough of the link handshake (real RSA-OAEP ticket exchange against a
//! freshly generated key) and the Main-channel bootstrap to drive a `Session`
//! through `connect`, channel attach, and a scripted message or two.

use rsa::pkcs8::EncodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;
use spice_client::protocol::*;
use spice_client::wire::MessageBuilder;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A freshly bound mock server plus the RSA key it will offer during the
/// link handshake.
pub struct MockSpiceServer {
    listener: TcpListener,
    key: Arc<RsaPrivateKey>,
}

impl MockSpiceServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        Self { listener, key: Arc::new(key) }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Accept one connection, complete the link handshake for it, then hand
    /// the raw stream to `after` for channel-specific scripting.
    pub fn accept_and_link<F, Fut>(self, after: F) -> JoinHandle<()>
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let (mut stream, _) = self.listener.accept().await.unwrap();
            complete_link_handshake(&mut stream, &self.key).await;
            after(stream).await;
        })
    }

    /// Accept connections in sequence, completing the link handshake for
    /// each before handing it to `handler` along with its 0-based arrival
    /// order. A real server gets one Main, one Inputs, and optionally one
    /// Playback connection per session; this lets a test script all three.
    pub fn serve<F, Fut>(self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(usize, TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut index = 0;
            loop {
                let (mut stream, _) = match self.listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                complete_link_handshake(&mut stream, &self.key).await;
                handler(index, stream).await;
                index += 1;
            }
        })
    }
}

async fn complete_link_handshake(stream: &mut TcpStream, key: &RsaPrivateKey) {
    let mut header_buf = [0u8; 16];
    stream.read_exact(&mut header_buf).await.unwrap();
    let magic = u32::from_le_bytes(header_buf[0..4].try_into().unwrap());
    assert_eq!(magic, SPICE_MAGIC);
    let body_size = u32::from_le_bytes(header_buf[12..16].try_into().unwrap());

    let mut body = vec![0u8; body_size as usize];
    stream.read_exact(&mut body).await.unwrap();

    let pub_key_der = key.to_public_key().to_public_key_der().unwrap();
    let pub_key_bytes = pub_key_der.as_bytes();
    assert_eq!(pub_key_bytes.len(), 162, "unexpected RSA-1024 SPKI DER length");

    let mut reply_body = Vec::with_capacity(174);
    reply_body.extend_from_slice(&SPICE_LINK_ERR_OK.to_le_bytes());
    reply_body.extend_from_slice(pub_key_bytes);
    reply_body.extend_from_slice(&1u32.to_le_bytes()); // num_common_caps
    reply_body.extend_from_slice(&1u32.to_le_bytes()); // num_channel_caps

    let mut reply_header = Vec::with_capacity(16);
    reply_header.extend_from_slice(&SPICE_MAGIC.to_le_bytes());
    reply_header.extend_from_slice(&SPICE_VERSION_MAJOR.to_le_bytes());
    reply_header.extend_from_slice(&SPICE_VERSION_MINOR.to_le_bytes());
    reply_header.extend_from_slice(&(reply_body.len() as u32).to_le_bytes());

    stream.write_all(&reply_header).await.unwrap();
    stream.write_all(&reply_body).await.unwrap();
    stream.flush().await.unwrap();

    let mut auth_buf = [0u8; 4];
    stream.read_exact(&mut auth_buf).await.unwrap();

    let mut ciphertext = vec![0u8; key.size()];
    stream.read_exact(&mut ciphertext).await.unwrap();
    let padding = Oaep::new::<Sha1>();
    key.decrypt(padding, &ciphertext)
        .expect("client should encrypt against the key we offered");

    stream.write_all(&SPICE_LINK_ERR_OK.to_le_bytes()).await.unwrap();
    stream.flush().await.unwrap();
}

/// Write one mini-header-framed server->client message.
pub async fn send_frame(stream: &mut TcpStream, msg_type: u16, body: &[u8]) {
    let frame = MessageBuilder::new(msg_type).body(body).finish();
    stream.write_all(&frame).await.unwrap();
    stream.flush().await.unwrap();
}

pub fn main_init_payload(session_id: u32, current_mouse_mode: u32, agent_tokens: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(&session_id.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes()); // display_channels_hint
    payload.extend_from_slice(&3u32.to_le_bytes()); // supported_mouse_modes
    payload.extend_from_slice(&current_mouse_mode.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes()); // agent_connected
    payload.extend_from_slice(&agent_tokens.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes()); // multi_media_time
    payload.extend_from_slice(&0u32.to_le_bytes()); // ram_hint
    payload
}

pub fn channels_list_payload(entries: &[(ChannelType, u8)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + entries.len() * 2);
    payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (channel_type, channel_id) in entries {
        payload.push(*channel_type as u8);
        payload.push(*channel_id);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_handshake_completes_against_a_real_client() {
        let server = MockSpiceServer::bind().await;
        let port = server.port();
        let handle = server.accept_and_link(|mut stream| async move {
            let init = main_init_payload(7, main::MSG_INIT as u32, 0);
            send_frame(&mut stream, main::MSG_INIT, &init).await;
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        });

        let session = spice_client::ClientBuilder::new(&format!("spice://127.0.0.1:{port}"))
            .with_password("hunter2")
            .build();
        let connected = tokio::time::timeout(std::time::Duration::from_secs(2), session.connect())
            .await
            .expect("connect timed out")
            .unwrap();
        assert!(connected);

        handle.abort();
        session.disconnect().await;
    }
}
