//! Buffered, framed connection.

use std::io::ErrorKind;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use super::messages::{Message, MessageCode, Protocol, HEADER_LEN, MAX_MSG_LEN};
use super::{tweaks, Error};

/// A TCP connection speaking the framed protocol.
pub struct Stream {
    inner: BufStream<TcpStream>,
}

impl Stream {
    /// Wrap an accepted connection.
    pub fn new(stream: TcpStream) -> Self {
        let _ = tweaks::tweak(&stream);

        Self {
            inner: BufStream::new(stream),
        }
    }

    /// Dial a peer.
    pub async fn connect(host: &str, port: u16) -> Result<Self, Error> {
        let stream = TcpStream::connect((host, port)).await?;

        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.get_ref().peer_addr().ok()
    }

    /// Send one framed message and flush.
    pub async fn send(&mut self, message: &impl Protocol) -> Result<(), Error> {
        let frame = message.frame()?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;

        Ok(())
    }

    /// Read one framed message.
    pub async fn recv(&mut self) -> Result<Message, Error> {
        let mut header = [0u8; HEADER_LEN];
        read_exact(&mut self.inner, &mut header).await?;

        let code = MessageCode::try_from(header[0])?;
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;

        if !(HEADER_LEN..=MAX_MSG_LEN).contains(&len) {
            return Err(Error::InvalidLength(len));
        }

        let mut payload = vec![0u8; len - HEADER_LEN];
        read_exact(&mut self.inner, &mut payload).await?;

        Ok(Message {
            code,
            payload: Bytes::from(payload),
        })
    }

    /// Read one message, requiring a specific frame code.
    pub async fn recv_require(&mut self, code: MessageCode) -> Result<Bytes, Error> {
        self.recv().await?.require(code)
    }
}

async fn read_exact(stream: &mut BufStream<TcpStream>, buf: &mut [u8]) -> Result<(), Error> {
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(Error::Eof),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::messages::{FromBytes, OperationRequest, OperationResponse, Status};
    use crate::sharding::{Key, KEY_SIZE};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_recv() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = Stream::new(socket);
            let payload = stream
                .recv_require(MessageCode::OperationRequest)
                .await
                .unwrap();
            let request = OperationRequest::from_bytes(payload).unwrap();
            assert_eq!(&request.value[..], b"hello");
            stream
                .send(&OperationResponse::status(Status::Success))
                .await
                .unwrap();
        });

        let mut stream = Stream::connect("127.0.0.1", addr.port()).await.unwrap();
        let request = OperationRequest::put(Key::new([9u8; KEY_SIZE]), Bytes::from_static(b"hello"));
        stream.send(&request).await.unwrap();

        let payload = stream
            .recv_require(MessageCode::OperationResponse)
            .await
            .unwrap();
        let response = OperationResponse::from_bytes(payload).unwrap();
        assert_eq!(response.status, Status::Success);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_frame_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = Stream::new(socket);
            assert!(matches!(stream.recv().await, Err(Error::UnknownCode(99))));
        });

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&[99u8, 0, 5, 1, 2]).await.unwrap();
        raw.flush().await.unwrap();

        server.await.unwrap();
    }
}
