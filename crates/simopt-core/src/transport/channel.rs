use super::Transport;
use crate::error::{EngineError, EngineResult};
use crate::message::{Envelope, Rank};
use tokio::sync::mpsc;

/// In-process transport: one unbounded channel per rank.
pub struct ChannelTransport {
    rank: Rank,
    peers: Vec<Option<mpsc::UnboundedSender<Envelope>>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl ChannelTransport {
    /// Fully connected endpoints for ranks `0..size`, in rank order. No
    /// endpoint can send to itself.
    pub fn mesh(size: usize) -> Vec<ChannelTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelTransport {
                rank,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
            })
            .collect()
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    async fn send(&mut self, envelope: Envelope) -> EngineResult<()> {
        let dest = envelope.destination;
        let peer = self
            .peers
            .get(dest)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                EngineError::Transport(format!("rank {} cannot reach rank {}", self.rank, dest))
            })?;
        peer.send(envelope)
            .map_err(|_| EngineError::Disconnected(dest))
    }

    async fn recv(&mut self) -> EngineResult<Envelope> {
        // Closed once every other endpoint is gone.
        self.inbox
            .recv()
            .await
            .ok_or_else(|| EngineError::Transport("all peers disconnected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Tag};

    #[tokio::test]
    async fn test_mesh_routes_by_destination() {
        let mut mesh = ChannelTransport::mesh(3);
        let mut two = mesh.pop().unwrap();
        let mut one = mesh.pop().unwrap();
        let mut zero = mesh.pop().unwrap();

        zero.send(Message::terminate(0, 2).into_envelope().unwrap())
            .await
            .unwrap();
        one.send(Message::terminate(1, 2).into_envelope().unwrap())
            .await
            .unwrap();

        let first = two.recv().await.unwrap();
        let second = two.recv().await.unwrap();
        assert_eq!(first.tag().unwrap(), Tag::Terminate);
        assert_eq!((first.source, second.source), (0, 1));
        assert_eq!(two.size(), 3);
    }
}
