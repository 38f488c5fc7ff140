#[path = "../mocks/mod.rs"]
mod mocks;

pub mod inputs_test;

use mocks::MockSpiceServer;
use spice_client::ClientBuilder;
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn connect_completes_the_link_handshake_against_a_real_server() {
    let server = MockSpiceServer::bind().await;
    let port = server.port();
    let handle = server.accept_and_link(|mut stream| async move {
        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf).await;
    });

    let session = ClientBuilder::new(&format!("spice://127.0.0.1:{port}"))
        .with_password("hunter2")
        .build();

    let connected = tokio::time::timeout(Duration::from_secs(2), session.connect())
        .await
        .expect("connect should not hang")
        .expect("link handshake should succeed");
    assert!(connected);
    // No CHANNELS_LIST was sent, so Inputs never attaches: readiness requires
    // both Main and Inputs, not Main alone.
    assert!(!session.ready());

    session.disconnect().await;
    assert!(!session.ready());
    handle.abort();
}

#[tokio::test]
async fn connect_fails_against_a_closed_port() {
    let server = MockSpiceServer::bind().await;
    let port = server.port();
    drop(server);

    let session = ClientBuilder::new(&format!("spice://127.0.0.1:{port}")).build();
    let result = tokio::time::timeout(Duration::from_secs(2), session.connect()).await;
    match result {
        Ok(Ok(_)) => panic!("connecting to a closed port should not succeed"),
        Ok(Err(_)) | Err(_) => {}
    }
}

#[tokio::test]
async fn channels_list_naming_inputs_does_not_error_the_main_loop() {
    // The session tries to link Inputs against the same endpoint; nothing
    // is listening there for a second connection so that link attempt just
    // stalls in the background. This test only checks that the Main
    // channel's own read loop survives a CHANNELS_LIST referencing Inputs;
    // since Inputs never actually attaches, `ready()` must stay false (see
    // `ready_becomes_true_once_inputs_attaches` for the attached case).
    let server = MockSpiceServer::bind().await;
    let port = server.port();
    let handle = server.accept_and_link(|mut stream| async move {
        let init = mocks::main_init_payload(1, spice_client::channels::main::MOUSE_MODE_CLIENT, 0);
        mocks::send_frame(&mut stream, spice_client::protocol::main::MSG_INIT, &init).await;

        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf).await;

        let list = mocks::channels_list_payload(&[(spice_client::protocol::ChannelType::Inputs, 0)]);
        mocks::send_frame(&mut stream, spice_client::protocol::main::MSG_CHANNELS_LIST, &list).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let session = ClientBuilder::new(&format!("spice://127.0.0.1:{port}")).build();
    session.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.ready());

    session.disconnect().await;
    handle.abort();
}

#[tokio::test]
async fn ready_becomes_true_once_inputs_attaches() {
    let server = MockSpiceServer::bind().await;
    let port = server.port();
    let handle = server.serve(move |index, mut stream| async move {
        match index {
            0 => {
                let init = mocks::main_init_payload(1, spice_client::channels::main::MOUSE_MODE_CLIENT, 0);
                mocks::send_frame(&mut stream, spice_client::protocol::main::MSG_INIT, &init).await;

                // drain the client's ATTACH_CHANNELS
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;

                let list =
                    mocks::channels_list_payload(&[(spice_client::protocol::ChannelType::Inputs, 0)]);
                mocks::send_frame(&mut stream, spice_client::protocol::main::MSG_CHANNELS_LIST, &list).await;

                // keep the Main connection open for the test's lifetime
                loop {
                    if stream.read(&mut buf).await.unwrap_or(0) == 0 {
                        break;
                    }
                }
            }
            1 => {
                // Inputs link completes on accept; just keep the socket open.
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;
            }
            _ => {}
        }
    });

    let session = ClientBuilder::new(&format!("spice://127.0.0.1:{port}")).build();
    session.connect().await.unwrap();
    assert!(!session.ready());

    let mut ready = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if session.ready() {
            ready = true;
            break;
        }
    }
    assert!(ready, "Inputs channel should attach and flip ready() to true");

    session.disconnect().await;
    assert!(!session.ready());
    handle.abort();
}
