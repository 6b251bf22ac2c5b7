use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::frame::Frame;
use crate::Error;

/// A client connection. Frames are read from and written to the socket through `FrameCodec`,
/// which keeps the partially received bytes buffered between reads.
pub struct Connection {
    pub id: Uuid,
    pub client_address: SocketAddr,
    frames: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream, client_address: SocketAddr) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            client_address,
            frames: Framed::new(stream, FrameCodec),
        }
    }

    /// Reads the next frame. Returns `None` when the peer closed the connection cleanly, that
    /// is, between two frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
        self.frames.next().await.transpose()
    }

    /// Writes a frame and flushes it to the socket.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        self.frames.send(frame).await
    }
}
