use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::comm::Communicator;
use crate::error::{Error, Result};

/// A communicator joining workers that run as threads of one process. Each
/// endpoint holds a sender to every peer and its own receiver.
///
pub struct LocalCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
}

impl LocalCommunicator {
    /// Create a fully connected group of `size` endpoints; endpoint `n` has
    /// rank `n`.
    pub fn group(size: usize) -> Vec<Self> {
        let (sinks, sources): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                peers: sinks.clone(),
                inbox,
            })
            .collect()
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        self.peers
            .get(rank)
            .ok_or_else(|| Error::transport(format!("no peer with rank {}", rank)))?
            .send(message)
            .map_err(|_| Error::transport(format!("rank {} has hung up", rank)))
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::transport("all peers have hung up")),
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn local_group_delivers_messages() {
        let group = LocalCommunicator::group(3);
        group[0].send(2, vec![1, 2, 3]).unwrap();
        group[1].send(2, vec![4]).unwrap();

        assert_eq!(group[2].try_recv().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(group[2].recv_timeout(Duration::from_millis(10)).unwrap(), Some(vec![4]));
        assert_eq!(group[2].try_recv().unwrap(), None);
        assert!(group[0].send(3, vec![]).is_err());
    }
}
