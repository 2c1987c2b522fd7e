// Integration tests for the voice service connection

mod common;

use anyhow::Result;
use common::{target, unused_endpoint, wait_until, within, ServerOptions, TestServer};
use std::time::Duration;
use voice_session::{AudioChunk, ChannelState, SessionError, TransportChannel, TransportConfig};

const LIMIT: Duration = Duration::from_secs(5);

fn config(endpoint: &str) -> TransportConfig {
    TransportConfig {
        endpoint: endpoint.to_string(),
        connect_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
        inbound_capacity: 8,
    }
}

#[tokio::test]
async fn test_frames_are_sent_in_order() -> Result<()> {
    let server = TestServer::start(ServerOptions::default()).await?;
    let mut channel = within(LIMIT, TransportChannel::connect(&config(&server.endpoint), &target("s1", "t1"))).await?;
    assert_eq!(channel.state(), ChannelState::Open);

    for sequence in 1..=3u64 {
        let chunk = AudioChunk::new(sequence, format!("frame-{}", sequence).into_bytes());
        channel.send(&chunk).await?;
    }
    assert_eq!(channel.frames_sent(), 3);

    assert!(wait_until(LIMIT, || server.log.frame_count() == 3).await);
    assert_eq!(
        server.log.frames(),
        vec![b"frame-1".to_vec(), b"frame-2".to_vec(), b"frame-3".to_vec()]
    );

    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);

    Ok(())
}

#[tokio::test]
async fn test_inbound_frames_are_sequenced() -> Result<()> {
    let server = TestServer::start(ServerOptions {
        replies: vec![vec![1, 1], vec![2, 2], vec![3, 3]],
        drop_after: None,
    })
    .await?;
    let mut channel = within(LIMIT, TransportChannel::connect(&config(&server.endpoint), &target("s1", "t1"))).await?;
    let mut inbound = channel.take_inbound().expect("inbound available");
    assert!(channel.take_inbound().is_none());

    for expected in 1..=3u64 {
        let chunk = within(LIMIT, inbound.recv()).await.expect("frame")?;
        assert_eq!(chunk.sequence(), expected);
        assert_eq!(&chunk.data()[..], &[expected as u8, expected as u8]);
    }

    // A close we initiate ends the stream without an error item
    channel.close().await;
    while let Some(item) = within(LIMIT, inbound.recv()).await {
        assert!(item.is_ok(), "unexpected fault after local close: {:?}", item);
    }

    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> Result<()> {
    let server = TestServer::start(ServerOptions::default()).await?;
    let mut channel = within(LIMIT, TransportChannel::connect(&config(&server.endpoint), &target("s1", "t1"))).await?;
    let mut states = channel.subscribe();

    within(LIMIT, channel.close()).await;
    within(LIMIT, channel.close()).await;
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(states.has_changed()?);
    assert_eq!(*states.borrow_and_update(), ChannelState::Closed);

    Ok(())
}

#[tokio::test]
async fn test_send_after_close_fails() -> Result<()> {
    let server = TestServer::start(ServerOptions::default()).await?;
    let mut channel = within(LIMIT, TransportChannel::connect(&config(&server.endpoint), &target("s1", "t1"))).await?;
    channel.close().await;

    let result = channel.send(&AudioChunk::new(1, vec![0u8; 4])).await;
    assert!(matches!(result, Err(SessionError::SendFailed(_))));
    assert_eq!(channel.frames_sent(), 0);

    Ok(())
}

#[tokio::test]
async fn test_remote_drop_terminates_inbound_stream() -> Result<()> {
    let server = TestServer::start(ServerOptions {
        replies: Vec::new(),
        drop_after: Some(1),
    })
    .await?;
    let mut channel = within(LIMIT, TransportChannel::connect(&config(&server.endpoint), &target("s1", "t1"))).await?;
    let mut inbound = channel.take_inbound().expect("inbound available");

    channel.send(&AudioChunk::new(1, vec![9u8; 4])).await?;

    let item = within(LIMIT, inbound.recv()).await;
    assert!(matches!(item, Some(Err(SessionError::StreamTerminated(_)))));
    assert_eq!(channel.state(), ChannelState::Closed);

    // Closed → send is refused, close only releases local resources
    let result = channel.send(&AudioChunk::new(2, vec![9u8; 4])).await;
    assert!(matches!(result, Err(SessionError::SendFailed(_))));
    within(LIMIT, channel.close()).await;

    Ok(())
}

#[tokio::test]
async fn test_connect_failure() -> Result<()> {
    let endpoint = unused_endpoint().await?;
    let result = within(LIMIT, TransportChannel::connect(&config(&endpoint), &target("s1", "t1"))).await;
    assert!(matches!(result, Err(SessionError::ConnectFailed(_))));

    Ok(())
}

#[tokio::test]
async fn test_connect_url_reaches_server() -> Result<()> {
    let server = TestServer::start(ServerOptions::default()).await?;
    let mut channel = within(
        LIMIT,
        TransportChannel::connect(&config(&server.endpoint), &target("session 7", "tok/en")),
    )
    .await?;

    let uris = server.log.uris();
    assert_eq!(uris.len(), 1);
    assert!(uris[0].starts_with("/ws/voice?"));
    assert!(uris[0].contains("sessionId=session+7"));
    assert!(uris[0].contains("token=tok%2Fen"));

    channel.close().await;
    Ok(())
}
