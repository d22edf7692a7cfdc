//! WebSocket entrypoint and per-connection tasks.
//!
//! Each connection gets a session id, a writer task draining the session's
//! event channel, a reader task parsing client frames, and a worker that runs
//! that session's frames one at a time in arrival order. When the client goes
//! away the worker is aborted, which cancels any in-flight fetch or OCR call.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ReceiptError;
use crate::protocol::{ClientEvent, ProcessRequest, ServerEvent};
use crate::session::new_session_id;
use crate::AppState;

/// How long queued events may take to reach the client once the reader stops.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Work queued for a session's worker.
enum Job {
    Process(ProcessRequest),
    /// A frame that could not be parsed; answered with one `error` in queue order.
    Reject(ReceiptError),
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let sid = new_session_id();
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();

    state.sessions.register(sid.clone(), event_tx.clone()).await;
    let active = state.sessions.len().await;
    info!(sid = %sid, active, "client connected");
    let _ = event_tx.send(ServerEvent::Connected { sid: sid.clone() });

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let worker_state = state.clone();
    let worker_sid = sid.clone();
    let worker_task = tokio::spawn(async move {
        while let Some(job) = job_rx.recv().await {
            match job {
                Job::Process(request) => worker_state.orchestrator.handle(&worker_sid, request).await,
                Job::Reject(err) => worker_state.orchestrator.report(&worker_sid, &err).await,
            }
        }
    });

    let limit = state.max_message_bytes;
    let reader_sid = sid.clone();
    // Resolves to the read failure to report, or `None` on a clean close.
    let mut recv_task = tokio::spawn(async move {
        loop {
            let msg = match receiver.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(ReceiptError::InvalidRequest(format!(
                        "could not read message (limit {} bytes): {}",
                        limit, e
                    )));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => {
                    let job = match ClientEvent::parse(&text) {
                        Ok(ClientEvent::ProcessReceipt(request)) => {
                            debug!(sid = %reader_sid, "queued process_receipt");
                            Job::Process(request)
                        }
                        Ok(ClientEvent::Unknown(event)) => {
                            warn!(sid = %reader_sid, "ignoring unknown event '{}'", event);
                            continue;
                        }
                        Err(err) => {
                            warn!(sid = %reader_sid, "rejected client frame: {}", err);
                            Job::Reject(err)
                        }
                    };
                    if job_tx.send(job).is_err() {
                        return None;
                    }
                }
                Message::Close(_) => return None,
                _ => {} // Ignore binary, ping, pong
            }
        }
    });

    // If either side of the socket finishes, tear the connection down.
    let (read_error, writer_done) = tokio::select! {
        res = &mut recv_task => (res.ok().flatten(), false),
        _ = &mut send_task => {
            recv_task.abort();
            (None, true)
        }
    };
    worker_task.abort();
    let _ = worker_task.await;

    if let Some(err) = read_error {
        warn!(sid = %sid, "closing after unreadable frame: {}", err);
        state.orchestrator.report(&sid, &err).await;
    }

    state.sessions.unregister(&sid).await;
    drop(event_tx);
    if !writer_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    info!(sid = %sid, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::{tests::serve, Acquirer};
    use crate::error::ErrorKind;
    use crate::normalize::Normalizer;
    use crate::ocr::SharedEngine;
    use crate::orchestrator::tests::{receipt_data_url, FakeEngine};
    use crate::orchestrator::Orchestrator;
    use crate::session::SessionRegistry;
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct Server {
        ws_url: String,
        state: AppState,
        _tmp: tempfile::TempDir,
    }

    async fn start(engine: Arc<FakeEngine>, max_message_bytes: usize) -> Server {
        let tmp = tempfile::tempdir().unwrap();
        let sessions = SessionRegistry::new();
        let orchestrator = Orchestrator::new(
            Acquirer::new("http://127.0.0.1:1", Duration::from_secs(5), 1 << 20).unwrap(),
            Normalizer::new(Some(tmp.path().to_path_buf())),
            SharedEngine::new(engine, Duration::from_secs(5)),
            sessions.clone(),
        );
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            sessions,
            max_message_bytes,
        };

        let base = serve(crate::router(state.clone())).await;
        Server {
            ws_url: format!("{}/ws", base.replacen("http://", "ws://", 1)),
            state,
            _tmp: tmp,
        }
    }

    async fn connect(server: &Server) -> Client {
        let (client, _) = connect_async(server.ws_url.as_str()).await.unwrap();
        client
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("no event within 5s")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    fn process_frame(image: &str) -> WsMessage {
        let frame = serde_json::json!({ "event": "process_receipt", "data": { "image": image } });
        WsMessage::Text(frame.to_string())
    }

    fn error_kind(event: &ServerEvent) -> Option<ErrorKind> {
        match event {
            ServerEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_connect_then_process_inline_receipt() {
        let server = start(FakeEngine::returning(vec!["TOKO MAJU", "TOTAL 10000"]), 1 << 20).await;
        let mut client = connect(&server).await;

        match next_event(&mut client).await {
            ServerEvent::Connected { sid } => assert!(!sid.is_empty()),
            other => panic!("expected connected, got {:?}", other),
        }

        client.send(process_frame(&receipt_data_url())).await.unwrap();
        assert!(matches!(next_event(&mut client).await, ServerEvent::Status { .. }));
        match next_event(&mut client).await {
            ServerEvent::Finish { raw_text, data } => {
                assert_eq!(raw_text, "TOKO MAJU TOTAL 10000");
                assert!(data.is_empty());
            }
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_frame_is_answered_after_queued_request() {
        let engine = FakeEngine::slow(vec!["KOPI 15000"], Duration::from_millis(300));
        let server = start(engine, 1 << 20).await;
        let mut client = connect(&server).await;
        next_event(&mut client).await;

        client.send(process_frame(&receipt_data_url())).await.unwrap();
        client.send(WsMessage::Text("{not json".to_string())).await.unwrap();

        assert!(matches!(next_event(&mut client).await, ServerEvent::Status { .. }));
        assert!(matches!(next_event(&mut client).await, ServerEvent::Finish { .. }));
        let rejected = next_event(&mut client).await;
        assert_eq!(error_kind(&rejected), Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn test_unknown_event_ignored_and_empty_request_rejected() {
        let server = start(FakeEngine::returning(vec!["unused"]), 1 << 20).await;
        let mut client = connect(&server).await;
        next_event(&mut client).await;

        client
            .send(WsMessage::Text(r#"{"event":"ping_me","data":{}}"#.to_string()))
            .await
            .unwrap();
        client
            .send(WsMessage::Text(r#"{"event":"process_receipt","data":{}}"#.to_string()))
            .await
            .unwrap();

        let event = next_event(&mut client).await;
        assert_eq!(error_kind(&event), Some(ErrorKind::NoImageProvided));
    }

    #[tokio::test]
    async fn test_oversized_frame_gets_error_before_close() {
        let server = start(FakeEngine::returning(vec!["unused"]), 1024).await;
        let mut client = connect(&server).await;
        next_event(&mut client).await;

        let huge = format!("data:image/png;base64,{}", "A".repeat(64 * 1024));
        client.send(process_frame(&huge)).await.unwrap();

        let event = next_event(&mut client).await;
        assert_eq!(error_kind(&event), Some(ErrorKind::InvalidRequest));
        match event {
            ServerEvent::Error { msg, .. } => assert!(msg.contains("1024")),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_session() {
        let server = start(FakeEngine::returning(vec!["unused"]), 1 << 20).await;
        let mut client = connect(&server).await;
        next_event(&mut client).await;
        assert_eq!(server.state.sessions.len().await, 1);

        client.close(None).await.unwrap();
        drop(client);

        let mut remaining = 1;
        for _ in 0..50 {
            remaining = server.state.sessions.len().await;
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 0);
    }
}
