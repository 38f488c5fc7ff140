//! End-to-end coverage of the Inputs channel through the public `Session`
//! API: link attach off `CHANNELS_LIST`, then keyboard/mouse calls actually
//! reaching the wire. Scancode/motion-split/button-masking edge cases are
//! covered by the unit tests in `spice_client::channels::inputs`; this file
//! only checks that `Session` wires those functions up correctly end to end.

use crate::mocks::{self, MockSpiceServer};
use spice_client::channels::main::MOUSE_MODE_CLIENT;
use spice_client::protocol::{inputs as inputs_proto, main as main_proto, ChannelType};
use spice_client::{ClientBuilder, MouseButton};
use std::time::Duration;
use tokio::io::AsyncReadExt;

async fn read_frame(stream: &mut tokio::net::TcpStream) -> (u16, Vec<u8>) {
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).await.unwrap();
    let msg_type = u16::from_le_bytes(header[0..2].try_into().unwrap());
    let size = u32::from_le_bytes(header[2..6].try_into().unwrap());
    let mut payload = vec![0u8; size as usize];
    stream.read_exact(&mut payload).await.unwrap();
    (msg_type, payload)
}

fn attach_inputs_channel(
    server: MockSpiceServer,
) -> (
    tokio::sync::oneshot::Receiver<tokio::net::TcpStream>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Arc::new(std::sync::Mutex::new(Some(tx)));
    let handle = server.serve(move |index, mut stream| {
        let tx = tx.clone();
        async move {
            match index {
                0 => {
                    let init = mocks::main_init_payload(1, MOUSE_MODE_CLIENT, 0);
                    mocks::send_frame(&mut stream, main_proto::MSG_INIT, &init).await;

                    // drain the client's ATTACH_CHANNELS
                    let _ = read_frame(&mut stream).await;

                    let list = mocks::channels_list_payload(&[(ChannelType::Inputs, 0)]);
                    mocks::send_frame(&mut stream, main_proto::MSG_CHANNELS_LIST, &list).await;

                    // keep the Main connection open for the test's lifetime
                    let mut buf = [0u8; 64];
                    loop {
                        if stream.read(&mut buf).await.unwrap_or(0) == 0 {
                            break;
                        }
                    }
                }
                1 => {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(stream);
                    }
                }
                _ => {}
            }
        }
    });
    (rx, handle)
}

#[tokio::test]
async fn key_and_mouse_calls_reach_the_inputs_channel() {
    let server = MockSpiceServer::bind().await;
    let port = server.port();
    let (inputs_stream_rx, handle) = attach_inputs_channel(server);

    let session = ClientBuilder::new(&format!("spice://127.0.0.1:{port}")).build();
    session.connect().await.unwrap();

    let mut inputs_stream = tokio::time::timeout(Duration::from_secs(2), inputs_stream_rx)
        .await
        .expect("Inputs channel should link")
        .unwrap();

    // give the session a moment to install the Inputs channel handle
    tokio::time::sleep(Duration::from_millis(50)).await;

    session.key_down(30).await.unwrap();
    let (msg_type, _) = read_frame(&mut inputs_stream).await;
    assert_eq!(msg_type, inputs_proto::MSGC_KEY_DOWN);

    session.key_up(30).await.unwrap();
    let (msg_type, _) = read_frame(&mut inputs_stream).await;
    assert_eq!(msg_type, inputs_proto::MSGC_KEY_UP);

    session.mouse_press(MouseButton::Left).await.unwrap();
    let (msg_type, _) = read_frame(&mut inputs_stream).await;
    assert_eq!(msg_type, inputs_proto::MSGC_MOUSE_PRESS);

    session.mouse_release(MouseButton::Left).await.unwrap();
    let (msg_type, _) = read_frame(&mut inputs_stream).await;
    assert_eq!(msg_type, inputs_proto::MSGC_MOUSE_RELEASE);

    session.disconnect().await;
    handle.abort();
}

#[tokio::test]
async fn input_calls_fail_before_the_channel_is_linked() {
    let session = ClientBuilder::new("spice://127.0.0.1:1").build();
    assert!(session.key_down(30).await.is_err());
    assert!(session.mouse_position(0, 0).await.is_err());
}
