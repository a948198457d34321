//! Live event stream over a real socket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;

use queuedesk_core::{CreateCategoryRequest, IssueRequest};
use queuedesk_server::api::create_router;

use common::TestFixture;

/// Serve the fixture's router on an ephemeral port.
async fn serve(fixture: &TestFixture) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(Arc::clone(&fixture.state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn wait_for_subscribers(fixture: &TestFixture, expected: usize) {
    for _ in 0..100 {
        if fixture.state.hub().subscriber_count() == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber count never reached {}", expected);
}

async fn next_event<S>(stream: &mut S) -> Value
where
    S: futures::Stream<
            Item = Result<tokio_tungstenite::tungstenite::Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    let message = timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("no event within timeout")
        .expect("stream ended")
        .expect("websocket error");
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn test_viewer_receives_events_in_order() {
    let fixture = TestFixture::new();
    let addr = serve(&fixture).await;

    let (mut socket, _) = connect_async(format!("ws://{}/api/v1/ws", addr))
        .await
        .expect("Failed to connect");
    wait_for_subscribers(&fixture, 1).await;

    let category = fixture
        .state
        .admin()
        .create_category(CreateCategoryRequest {
            name: "General".to_string(),
            prefix: "a".to_string(),
            priority: 1,
            is_active: true,
        })
        .await
        .unwrap();

    let created = next_event(&mut socket).await;
    assert_eq!(created["type"], "category_created");
    assert_eq!(created["payload"]["prefix"], "A");

    let request = IssueRequest {
        category_id: category.id,
        ..Default::default()
    };
    fixture
        .state
        .engine()
        .issue_ticket(request)
        .await
        .unwrap()
        .applied()
        .unwrap();

    let ticket = next_event(&mut socket).await;
    assert_eq!(ticket["type"], "ticket_update");
    assert_eq!(ticket["payload"]["ticket_number"], "A001");

    let stats = next_event(&mut socket).await;
    assert_eq!(stats["type"], "stats_update");
    assert_eq!(stats["payload"]["waiting"], 1);
}

#[tokio::test]
async fn test_disconnect_unregisters_viewer() {
    let fixture = TestFixture::new();
    let addr = serve(&fixture).await;

    let (socket, _) = connect_async(format!("ws://{}/api/v1/ws", addr))
        .await
        .expect("Failed to connect");
    wait_for_subscribers(&fixture, 1).await;

    drop(socket);
    wait_for_subscribers(&fixture, 0).await;

    // Publishing with nobody listening reaches no one and does not fail.
    let report = fixture
        .state
        .hub()
        .publish(queuedesk_core::QueueEvent::StatsUpdate(
            fixture.state.engine().stats().await.unwrap(),
        ));
    assert_eq!(report.delivered, 0);
}
