use super::Transport;
use crate::error::{EngineError, EngineResult};
use crate::message::{Envelope, Handshake, Rank, Tag, COORDINATOR};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Inbound = EngineResult<Envelope>;

/// Newline-delimited JSON envelopes over TCP.
///
/// The coordinator holds one connection per worker; a worker holds a single
/// connection to the coordinator. The first line the coordinator writes on a
/// connection is a [`Handshake`] carrying the worker's rank.
pub struct TcpTransport {
    rank: Rank,
    size: usize,
    writers: BTreeMap<Rank, OwnedWriteHalf>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    readers: Vec<JoinHandle<()>>,
}

fn spawn_reader(
    peer: Rank,
    mut reader: BufReader<OwnedReadHalf>,
    tx: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut line = String::new();
        let mut said_goodbye = false;
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    // EOF after TERMINATE is the normal end of a session
                    if !said_goodbye {
                        let _ = tx.send(Err(EngineError::Disconnected(peer)));
                    }
                    debug!("Connection to rank {} closed", peer);
                    break;
                }
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => {
                    let parsed = Envelope::from_line(&line)
                        .map_err(EngineError::from)
                        .and_then(|env| {
                            if env.source == peer {
                                Ok(env)
                            } else {
                                Err(EngineError::Transport(format!(
                                    "connection of rank {} carried an envelope from rank {}",
                                    peer, env.source
                                )))
                            }
                        });
                    let fatal = parsed.is_err();
                    if let Ok(env) = &parsed {
                        said_goodbye = env.tag == Tag::Terminate.code();
                    }
                    if tx.send(parsed).is_err() || fatal {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e.into()));
                    break;
                }
            }
        }
    })
}

impl TcpTransport {
    /// Accepts `workers` connections and numbers them 1..=workers in
    /// arrival order.
    pub async fn accept_workers(listener: &TcpListener, workers: usize) -> EngineResult<Self> {
        let size = workers + 1;
        let (tx, inbox) = mpsc::unbounded_channel();
        let mut writers = BTreeMap::new();
        let mut readers = Vec::with_capacity(workers);

        for rank in 1..size {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let (read, mut write) = stream.into_split();

            let mut hello = serde_json::to_string(&Handshake { rank, size })?;
            hello.push('\n');
            write.write_all(hello.as_bytes()).await?;

            info!("🤝 Worker at {} joined as rank {}/{}", addr, rank, workers);
            readers.push(spawn_reader(rank, BufReader::new(read), tx.clone()));
            writers.insert(rank, write);
        }

        Ok(Self {
            rank: COORDINATOR,
            size,
            writers,
            inbox,
            readers,
        })
    }

    /// Connects to the coordinator and waits for the rank assignment.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> EngineResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        let mut reader = BufReader::new(read);

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(EngineError::Disconnected(COORDINATOR));
        }
        let hello: Handshake = serde_json::from_str(line.trim_end())?;
        if hello.rank == COORDINATOR || hello.rank >= hello.size {
            return Err(EngineError::Transport(format!(
                "coordinator assigned invalid rank {} of {}",
                hello.rank, hello.size
            )));
        }
        info!("🤝 Joined as rank {} of {}", hello.rank, hello.size);

        let (tx, inbox) = mpsc::unbounded_channel();
        let readers = vec![spawn_reader(COORDINATOR, reader, tx)];
        Ok(Self {
            rank: hello.rank,
            size: hello.size,
            writers: BTreeMap::from([(COORDINATOR, write)]),
            inbox,
            readers,
        })
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send(&mut self, envelope: Envelope) -> EngineResult<()> {
        let dest = envelope.destination;
        let line = envelope.to_line()?;
        let writer = self.writers.get_mut(&dest).ok_or_else(|| {
            EngineError::Transport(format!("rank {} has no connection to rank {}", self.rank, dest))
        })?;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("Write to rank {} failed: {}", dest, e);
            return Err(EngineError::Disconnected(dest));
        }
        Ok(())
    }

    async fn recv(&mut self) -> EngineResult<Envelope> {
        match self.inbox.recv().await {
            Some(inbound) => inbound,
            None => Err(EngineError::Transport("all connections closed".to_string())),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for handle in &self.readers {
            handle.abort();
        }
    }
}
