use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tracing::debug;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::codec::{LineCodec, PacketCodec};
use crate::error::{GearError, Result};
use crate::network::ServerEndpoint;

/// A codec usable under [`Connection`]: it encodes the same item type it
/// decodes and reports failures as [`GearError`].
pub trait Framing:
    Decoder<Error = GearError> + Encoder<<Self as Decoder>::Item, Error = GearError> + Default + Unpin + Send
{
}

impl<T> Framing for T where
    T: Decoder<Error = GearError> + Encoder<<T as Decoder>::Item, Error = GearError> + Default + Unpin + Send
{
}

/// Binary job-protocol connection used by clients and workers.
pub type JobConnection = Connection<PacketCodec>;

/// Text admin-protocol connection.
pub type AdminConnection = Connection<LineCodec>;

/// One framed TCP socket to a server.
///
/// Reads and writes happen on the caller's task; nothing is spawned.
/// `recv` is cancel-safe, so several connections can be raced.
#[derive(Debug)]
pub struct Connection<C> {
    peer: String,
    framed: Framed<TcpStream, C>,
}

impl<C: Framing> Connection<C> {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream, peer: impl Into<String>) -> Self {
        let peer = peer.into();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "cannot set TCP_NODELAY: {e}");
        }
        Self {
            peer,
            framed: Framed::new(stream, C::default()),
        }
    }

    /// Open a socket to the first reachable resolved address.
    pub async fn connect(endpoint: &ServerEndpoint) -> Result<Self> {
        let stream = TcpStream::connect(endpoint.addrs())
            .await
            .map_err(|e| GearError::connection(endpoint, e))?;
        Ok(Self::new(stream, endpoint.to_string()))
    }

    /// The endpoint this connection talks to, as `host:port`.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, item: <C as Decoder>::Item) -> Result<()> {
        self.framed.send(item).await.map_err(|e| self.tag(e))
    }

    /// Next item from the peer. End of stream is a connection failure.
    pub async fn recv(&mut self) -> Result<<C as Decoder>::Item> {
        match self.framed.next().await {
            Some(Ok(item)) => Ok(item),
            Some(Err(e)) => Err(self.tag(e)),
            None => Err(GearError::connection(
                &self.peer,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed by peer"),
            )),
        }
    }

    fn tag(&self, e: GearError) -> GearError {
        match e {
            GearError::Io(source) => GearError::connection(&self.peer, source),
            other => other,
        }
    }
}
