pub mod channel;
pub mod tcp;

pub use self::channel::ChannelTransport;
pub use self::tcp::TcpTransport;

use crate::error::EngineResult;
use crate::message::{Envelope, Message, Phase, Rank, Tag};
use std::collections::VecDeque;
use std::future::Future;
use tracing::debug;

/// Reliable point-to-point delivery between ranks.
///
/// Envelopes from one source arrive in the order that source sent them.
/// Nothing is promised about interleaving across sources.
pub trait Transport: Send {
    fn rank(&self) -> Rank;

    /// Number of ranks, coordinator included.
    fn size(&self) -> usize;

    fn send(&mut self, envelope: Envelope) -> impl Future<Output = EngineResult<()>> + Send;

    /// Next envelope from any source.
    fn recv(&mut self) -> impl Future<Output = EngineResult<Envelope>> + Send;
}

/// Which envelopes a receive is waiting for. Empty fields match anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvFilter<'a> {
    pub source: Option<Rank>,
    pub tags: Option<&'a [Tag]>,
}

impl<'a> RecvFilter<'a> {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn from(source: Rank) -> Self {
        Self {
            source: Some(source),
            tags: None,
        }
    }

    pub fn with_tags(mut self, tags: &'a [Tag]) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Undecodable tags never match a tag filter; they surface once the
    /// filter is widened to "any tag".
    fn matches(&self, env: &Envelope) -> bool {
        if self.source.is_some_and(|s| s != env.source) {
            return false;
        }
        match self.tags {
            Some(tags) => env.tag().map(|t| tags.contains(&t)).unwrap_or(false),
            None => true,
        }
    }
}

/// A transport plus a holding area for envelopes that arrived while a
/// narrower receive was pending.
///
/// Held envelopes are handed out before anything new is read, oldest first,
/// so per-source ordering survives filtered receives.
pub struct Mailbox<T: Transport> {
    transport: T,
    held: VecDeque<Envelope>,
}

impl<T: Transport> Mailbox<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            held: VecDeque::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    pub async fn send(&mut self, envelope: Envelope) -> EngineResult<()> {
        self.transport.send(envelope).await
    }

    pub async fn send_message(&mut self, message: Message) -> EngineResult<()> {
        debug!("-> rank {}: {}", message.destination, message.tag);
        let envelope = message.into_envelope()?;
        self.transport.send(envelope).await
    }

    pub async fn recv(&mut self, filter: RecvFilter<'_>) -> EngineResult<Envelope> {
        if let Some(pos) = self.held.iter().position(|e| filter.matches(e)) {
            if let Some(env) = self.held.remove(pos) {
                return Ok(env);
            }
        }
        loop {
            let env = self.transport.recv().await?;
            if filter.matches(&env) {
                return Ok(env);
            }
            debug!("Holding envelope tag {} from rank {}", env.tag, env.source);
            self.held.push_back(env);
        }
    }

    /// Receives and decodes a case message that must be legal in `phase`.
    pub async fn recv_message(
        &mut self,
        filter: RecvFilter<'_>,
        phase: Phase,
    ) -> EngineResult<Message> {
        let env = self.recv(filter).await?;
        let message = Message::from_envelope(env, phase)?;
        debug!("<- rank {}: {}", message.source, message.tag);
        Ok(message)
    }
}
