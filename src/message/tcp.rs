use std::collections::HashMap;
use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::backoff::{retry, ExponentialBackoff};
use super::{comm::Communicator, util};
use crate::error::{Error, Result};

const CXN_W_TIMEOUT: Duration = Duration::from_millis(2000);
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const RETRY_WAIT: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(5000);
const MAX_CONNECT_ATTEMPTS: usize = 40;

/// Owns the threads moving bytes between this process and its peers: one
/// listener accepting connections (and one reader thread per accepted
/// connection), and one serial sender holding a connection to each peer it
/// has written to. Messages are framed by a length prefix, and the receiver
/// acknowledges each frame by echoing its length.
///
pub struct TcpHost {
    listen_thread: Option<thread::JoinHandle<()>>,
    send_thread: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl TcpHost {
    /// Bind the listener for `peers[rank]` and start the transport threads.
    /// Returns the host, which must outlive the communicator's use, and the
    /// communicator.
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> Result<(Self, TcpCommunicator)> {
        let addr = *peers
            .get(rank)
            .ok_or_else(|| Error::transport(format!("rank {} is not in the peer list", rank)))?;
        let listener = TcpListener::bind(addr)
            .and_then(|l| l.set_nonblocking(true).map(|()| l))
            .map_err(|e| Error::transport(format!("cannot listen on {}: {}", addr, e)))?;

        info!("listening on {}", addr);

        let stop = Arc::new(AtomicBool::new(false));
        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_serial_sender(peers.clone(), send_src);
        let listen_thread = Self::start_listener(listener, recv_sink, stop.clone());

        let host = TcpHost {
            listen_thread: Some(listen_thread),
            send_thread: Some(send_thread),
            stop,
        };
        let comm = TcpCommunicator {
            rank,
            num_peers: peers.len(),
            send_sink,
            recv_src,
        };
        Ok((host, comm))
    }

    /// Wait for queued messages to be delivered, then stop listening. The
    /// communicator must have been dropped first, or this waits forever.
    pub fn join(&mut self) {
        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("tcp sender thread panicked");
            }
        }
        self.stop.store(true, Ordering::SeqCst);

        if let Some(handle) = self.listen_thread.take() {
            if handle.join().is_err() {
                error!("tcp listener thread panicked");
            }
        }
    }

    fn start_serial_sender(peers: Vec<SocketAddr>, send_src: Receiver<(usize, Vec<u8>)>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, message) in send_src {
                let mut attempts = 0;

                loop {
                    if !table.contains_key(&rank) {
                        match Self::connect_with_retry(peers[rank]) {
                            Ok(stream) => {
                                table.insert(rank, stream);
                            }
                            Err(e) => {
                                error!("giving up on {}: {}", peers[rank], e);
                                break;
                            }
                        }
                    }
                    let client = match table.get_mut(&rank) {
                        Some(client) => client,
                        None => break,
                    };
                    // A frame whose ack was lost goes out again. The receiving
                    // postmaster drops the second copy once the first is taken.
                    match Self::write_frame(client, &message) {
                        Ok(()) => break,
                        Err(e) => {
                            attempts += 1;
                            error!("failed to send message to {}: {}", peers[rank], e);
                            table.remove(&rank);

                            if attempts == MAX_CONNECT_ATTEMPTS {
                                error!("dropping message to {} after {} attempts", peers[rank], attempts);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("tcp sender shutting down");
        })
    }

    fn write_frame(client: &mut TcpStream, message: &[u8]) -> io::Result<()> {
        util::write_usize(client, message.len())?;
        client.write_all(message)?;

        let ack = util::read_usize(client)?;

        if ack != message.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sent {} bytes but the receiver acknowledged {}", message.len(), ack),
            ));
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, recv_sink: Sender<Vec<u8>>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, remote)) => Self::handle_connection(stream, remote, recv_sink.clone()),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                    Err(e) => {
                        error!("accept failed: {}", e);
                        thread::sleep(ACCEPT_POLL)
                    }
                }
            }
            debug!("tcp listener shutting down");
        })
    }

    fn handle_connection(stream: TcpStream, remote: SocketAddr, recv_sink: Sender<Vec<u8>>) {
        info!("receiving connection from {}", remote);

        thread::spawn(move || {
            let result = (|| -> io::Result<()> {
                let mut stream = stream;
                stream.set_nonblocking(false)?;
                stream.set_write_timeout(Some(CXN_W_TIMEOUT))?;

                loop {
                    let size = match util::read_usize(&mut stream) {
                        Ok(size) => size,
                        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                        Err(e) => return Err(e),
                    };
                    let bytes = util::read_bytes_vec(&mut stream, size)?;

                    recv_sink
                        .send(bytes)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                    util::write_usize(&mut stream, size)?;
                }
            })();

            match result {
                Ok(()) => debug!("connection from {} closed", remote),
                Err(e) => warn!("connection from {} failed: {}", remote, e),
            }
        });
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        let delays = ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2).take(MAX_CONNECT_ATTEMPTS);

        retry(
            delays,
            || {
                let stream = TcpStream::connect(addr)?;
                stream.set_write_timeout(Some(CXN_W_TIMEOUT))?;
                stream.set_nodelay(true)?;
                Ok(stream)
            },
            |e: &io::Error, delay| debug!("connect to {} failed ({}), retrying in {:?}", addr, e, delay),
        )
    }
}

/// The communicator half of the TCP transport.
///
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: Sender<(usize, Vec<u8>)>,
    recv_src: Receiver<Vec<u8>>,
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        if rank >= self.num_peers {
            return Err(Error::transport(format!("no peer with rank {}", rank)));
        }
        self.send_sink
            .send((rank, message))
            .map_err(|_| Error::transport("tcp sender thread has stopped"))
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.recv_src.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::transport("tcp listener has stopped")),
        }
    }
}
