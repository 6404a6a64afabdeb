use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use minesweeper_common::protocol::{ClientMessage, Frame};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, info, warn};

use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsReader = SplitStream<WsStream>;

/// Binary frame connection to a lobby
pub struct LobbySocket {
    sender: mpsc::UnboundedSender<Frame>,
    reader: WsReader,
    writer_task: JoinHandle<()>,
    stop_writer: oneshot::Sender<()>,
}

impl LobbySocket {
    /// Connect to the lobby socket, announcing `username` in the `User-Name` header
    pub async fn connect(url: &str, username: &str) -> Result<Self> {
        info!("Connecting to lobby socket: {} as {:?}", url, username);

        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("User-Name", HeaderValue::from_str(username)?);

        let (ws_stream, _) = connect_async(request).await?;
        info!("Lobby socket connected");

        let (writer, reader) = ws_stream.split();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Frame>();
        let (stop_writer, mut stopped) = oneshot::channel::<()>();

        // All outgoing frames go through one task so callers never share the sink.
        // It stops once every sender is gone or the socket goes away.
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            loop {
                let frame = tokio::select! {
                    biased;
                    frame = receiver.recv() => frame,
                    _ = &mut stopped => None,
                };
                let Some(frame) = frame else {
                    break;
                };
                debug!("Sending {:?} frame ({} bytes)", frame.kind, frame.payload.len());
                if let Err(e) = writer.send(Message::Binary(frame.to_bytes().into())).await {
                    warn!("Failed to send frame: {}", e);
                    break;
                }
            }

            let _ = writer.close().await;
        });

        Ok(Self {
            sender,
            reader,
            writer_task,
            stop_writer,
        })
    }

    /// Get a cloneable sender for outgoing frames
    pub fn get_sender(&self) -> mpsc::UnboundedSender<Frame> {
        self.sender.clone()
    }

    pub fn send_message(&self, message: &ClientMessage) -> Result<()> {
        self.sender
            .send(message.encode())
            .map_err(|_| "Lobby socket sender closed")?;
        Ok(())
    }

    /// Receive the next frame, or `None` once the connection is closed
    pub async fn receive_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(message) = self.reader.next().await {
            match message? {
                Message::Binary(bytes) => return Ok(Some(Frame::from_bytes(&bytes))),
                Message::Close(frame) => {
                    info!("Lobby socket closed: {:?}", frame);
                    return Ok(None);
                }
                other => debug!("Skipping non-binary message: {:?}", other),
            }
        }

        Ok(None)
    }

    /// Close the connection after flushing queued frames, even while
    /// clones of the sender are still alive.
    pub async fn close(self) -> Result<()> {
        drop(self.sender);
        let _ = self.stop_writer.send(());
        let _ = self.writer_task.await;

        Ok(())
    }
}
