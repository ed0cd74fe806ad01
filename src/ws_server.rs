// WebSocket hub for auction clients.
//
// Accepts connections, forwards inbound text frames into the session loop,
// and delivers outbound frames through a per-client channel. All game logic
// lives behind the channel; this module only moves frames.

use futures_util::stream::{SplitSink, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

/// Events emitted by the hub to the session loop.
#[derive(Debug)]
pub enum HubEvent {
    /// A client connected; outbound frames for it go through `outbound`.
    Connected {
        client_id: u64,
        outbound: mpsc::Sender<String>,
    },
    /// The client went away (clean close or error).
    Disconnected { client_id: u64 },
    /// A text frame arrived from the client (raw JSON string).
    Frame { client_id: u64, text: String },
}

/// Run the hub on `bind:port`, forwarding events through `tx`. Each
/// connection gets its own reader/writer tasks; the hub runs until the
/// task is cancelled or the listener fails.
pub async fn run(bind: &str, port: u16, tx: mpsc::Sender<HubEvent>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("{bind}:{port}")).await?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket hub listening on {local_addr}");

    let mut next_client_id: u64 = 0;
    loop {
        let (stream, addr) = listener.accept().await?;
        next_client_id += 1;
        let client_id = next_client_id;
        let addr_str = addr.to_string();
        info!("Accepted connection {client_id} from {addr_str}");

        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => handle_client(client_id, &addr_str, ws, tx).await,
                Err(e) => warn!("WebSocket handshake failed for {addr_str}: {e}"),
            }
        });
    }
}

async fn handle_client<S>(
    client_id: u64,
    addr: &str,
    ws: WebSocketStream<S>,
    tx: mpsc::Sender<HubEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws.split();
    let (out_tx, out_rx) = mpsc::channel::<String>(64);

    if tx
        .send(HubEvent::Connected {
            client_id,
            outbound: out_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(forward_outbound(out_rx, write));
    let _ = pump_frames(client_id, read, &tx, addr).await;
    let _ = tx.send(HubEvent::Disconnected { client_id }).await;
    writer.abort();
}

/// Drain the per-client outbound channel into the socket.
async fn forward_outbound<S>(
    mut rx: mpsc::Receiver<String>,
    mut write: SplitSink<WebSocketStream<S>, Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(text) = rx.recv().await {
        if write.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

/// Forward inbound text frames from any message stream through `tx`.
/// Returns `Err(())` if the channel is closed (session loop gone),
/// signalling the caller to stop.
///
/// Generic over the stream so the frame handling is testable with in-memory
/// streams, no TCP involved.
pub async fn pump_frames<St>(
    client_id: u64,
    mut stream: St,
    tx: &mpsc::Sender<HubEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = HubEvent::Frame {
                    client_id,
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {client_id} ({addr}) sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from client {client_id} ({addr}): {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio_tungstenite::tungstenite::Error as WsError;

    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    fn frame_text(event: HubEvent) -> Option<(u64, String)> {
        match event {
            HubEvent::Frame { client_id, text } => Some((client_id, text)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn text_frames_are_forwarded_with_client_id() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![Ok(Message::Text(r#"{"type":"START_AUCTION"}"#.into()))];

        pump_frames(7, mock_stream(messages), &tx, "test").await.unwrap();

        let (client_id, text) = frame_text(rx.recv().await.unwrap()).unwrap();
        assert_eq!(client_id, 7);
        assert_eq!(text, r#"{"type":"START_AUCTION"}"#);
    }

    #[tokio::test]
    async fn frames_keep_arrival_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("first".into())),
            Ok(Message::Text("second".into())),
        ];

        pump_frames(1, mock_stream(messages), &tx, "test").await.unwrap();

        assert_eq!(frame_text(rx.recv().await.unwrap()).unwrap().1, "first");
        assert_eq!(frame_text(rx.recv().await.unwrap()).unwrap().1, "second");
    }

    #[tokio::test]
    async fn close_frame_stops_the_pump() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("before".into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after".into())),
        ];

        pump_frames(1, mock_stream(messages), &tx, "test").await.unwrap();

        assert_eq!(frame_text(rx.recv().await.unwrap()).unwrap().1, "before");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn socket_error_stops_the_pump() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("before".into())),
            Err(WsError::ConnectionClosed),
            Ok(Message::Text("after".into())),
        ];

        pump_frames(1, mock_stream(messages), &tx, "test").await.unwrap();

        assert_eq!(frame_text(rx.recv().await.unwrap()).unwrap().1, "before");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_text_frames_are_ignored() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Text("kept".into())),
        ];

        pump_frames(1, mock_stream(messages), &tx, "test").await.unwrap();

        assert_eq!(frame_text(rx.recv().await.unwrap()).unwrap().1, "kept");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_is_reported() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        let messages = vec![Ok(Message::Text("orphan".into()))];
        assert!(pump_frames(1, mock_stream(messages), &tx, "test").await.is_err());
    }
}
