//! Boundary data exchange between blocks, and the collectives that share
//! the same transport.
//!
//! Every message travels through a [`Postmaster`]. Blocks on the same worker
//! hand their buffers straight to the mailbox; blocks on other workers go
//! through the communicator inside an [`Envelope`] encoded with MessagePack.
//! Each boundary message is keyed by its exchange round and a [`Tag`], so a
//! receiving block can ask for exactly the message it expects and leave the
//! task pending until it shows up.

pub mod boundary;
pub mod transfer;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{BinomialTree, Communicator};
use crate::neighbor::Face;

/// How long a collective waits without hearing from a peer before failing.
pub const DEFAULT_PATIENCE: Duration = Duration::from_secs(60);

const COLLECTIVE_POLL: Duration = Duration::from_millis(10);




/**
 * The kind of data carried by a boundary message.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    /// Cell-centered conserved variables.
    Cons,
    /// All three components of the face-centered field.
    Field,
    /// Face fluxes at a level interface, sent fine to coarse.
    Flux,
}

impl Quantity {
    pub const ALL: [Quantity; 3] = [Quantity::Cons, Quantity::Field, Quantity::Flux];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index]
    }
}




/**
 * Identifies a boundary message within a round: where it came from, which
 * face of the receiving block it fills, and what it carries.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub src_rank: usize,
    pub src_lid: usize,
    pub dst_face: Face,
    pub quantity: Quantity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct MailKey {
    round: u64,
    dst_lid: usize,
    tag: Tag,
}

/// Messages waiting to be taken, and the keys already taken this round.
#[derive(Default)]
struct Mailbox {
    letters: HashMap<MailKey, Vec<f64>>,
    collected: HashSet<MailKey>,
}




/**
 * What goes over the wire between workers.
 */
#[derive(Debug, Serialize, Deserialize)]
pub enum Envelope {
    Boundary {
        round: u64,
        dst_lid: usize,
        tag: Tag,
        data: Vec<f64>,
    },
    Collective {
        epoch: u64,
        from: usize,
        value: f64,
    },
}




/**
 * Routes boundary messages to the blocks of one worker, and runs the
 * min-reduction and barrier collectives over the same communicator.
 */
pub struct Postmaster {
    comm: Box<dyn Communicator>,
    round: AtomicU64,
    epoch: AtomicU64,
    mailbox: Mutex<Mailbox>,
    collectives: Mutex<HashMap<(u64, usize), f64>>,
    patience: Duration,
}

impl Postmaster {
    pub fn new(comm: Box<dyn Communicator>) -> Self {
        Self {
            comm,
            round: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            mailbox: Mutex::new(Mailbox::default()),
            collectives: Mutex::new(HashMap::new()),
            patience: DEFAULT_PATIENCE,
        }
    }

    /// Change how long a collective may wait on its peers.
    pub fn with_patience(mut self, patience: Duration) -> Self {
        self.patience = patience;
        self
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    pub fn patience(&self) -> Duration {
        self.patience
    }

    /**
     * Move on to a new exchange round. Messages left over from earlier rounds
     * were never collected; they are dropped with an error. A message that
     * arrives again after being taken in its round is dropped quietly.
     */
    pub fn begin_round(&self, round: u64) {
        self.round.store(round, Ordering::SeqCst);

        let mut mailbox = self.mailbox.lock().unwrap();
        let before = mailbox.letters.len();
        mailbox.letters.retain(|key, _| key.round >= round);
        mailbox.collected.retain(|key| key.round >= round);

        if mailbox.letters.len() < before {
            error!(
                "dropped {} uncollected messages from before round {}",
                before - mailbox.letters.len(),
                round
            );
        }
    }

    /**
     * Send a boundary buffer to block `dst_lid` on worker `dst_rank`, for
     * the current round.
     */
    pub fn post(&self, dst_rank: usize, dst_lid: usize, tag: Tag, data: Vec<f64>) -> Result<()> {
        let round = self.round();

        if dst_rank == self.rank() {
            self.mailbox
                .lock()
                .unwrap()
                .letters
                .insert(MailKey { round, dst_lid, tag }, data);
            Ok(())
        } else {
            self.send_envelope(dst_rank, &Envelope::Boundary { round, dst_lid, tag, data })
        }
    }

    /**
     * Remove and return the current round's message for block `dst_lid`
     * with the given tag, if it has arrived.
     */
    pub fn take(&self, dst_lid: usize, tag: Tag) -> Result<Option<Vec<f64>>> {
        self.poll()?;
        let key = MailKey {
            round: self.round(),
            dst_lid,
            tag,
        };
        let mut mailbox = self.mailbox.lock().unwrap();
        let letter = mailbox.letters.remove(&key);

        if letter.is_some() {
            mailbox.collected.insert(key);
        }
        Ok(letter)
    }

    /**
     * Deliver whatever the communicator has ready, without waiting. Returns
     * the number of envelopes delivered.
     */
    pub fn poll(&self) -> Result<usize> {
        let mut count = 0;

        while let Some(bytes) = self.comm.try_recv()? {
            self.deliver(&bytes)?;
            count += 1;
        }
        Ok(count)
    }

    /**
     * Wait up to `timeout` for at least one envelope, then deliver anything
     * else that is ready. Returns the number of envelopes delivered.
     */
    pub fn wait(&self, timeout: Duration) -> Result<usize> {
        match self.comm.recv_timeout(timeout)? {
            Some(bytes) => {
                self.deliver(&bytes)?;
                Ok(1 + self.poll()?)
            }
            None => Ok(0),
        }
    }

    fn send_envelope(&self, rank: usize, envelope: &Envelope) -> Result<()> {
        let bytes = rmp_serde::to_vec(envelope)
            .map_err(|e| Error::transport(format!("cannot encode envelope: {}", e)))?;
        self.comm.send(rank, bytes)
    }

    fn deliver(&self, bytes: &[u8]) -> Result<()> {
        let envelope: Envelope = rmp_serde::from_read_ref(bytes)
            .map_err(|e| Error::transport(format!("cannot decode envelope: {}", e)))?;

        match envelope {
            Envelope::Boundary { round, dst_lid, tag, data } => {
                let current = self.round();

                if round < current {
                    error!(
                        "dropping message for round {} (now in round {}): {:?} to block {}",
                        round, current, tag, dst_lid
                    );
                } else {
                    if round > current {
                        debug!("holding message for future round {}", round);
                    }
                    let key = MailKey { round, dst_lid, tag };
                    let mut mailbox = self.mailbox.lock().unwrap();

                    if mailbox.collected.contains(&key) {
                        debug!("dropping a resent copy of {:?} to block {}", tag, dst_lid);
                    } else {
                        mailbox.letters.insert(key, data);
                    }
                }
            }
            Envelope::Collective { epoch, from, value } => {
                if epoch / 2 + 1 < self.epoch.load(Ordering::SeqCst) {
                    debug!("dropping a resent collective value from rank {}", from);
                } else {
                    self.collectives.lock().unwrap().insert((epoch, from), value);
                }
            }
        }
        Ok(())
    }

    fn wait_collective(&self, epoch: u64, from: usize) -> Result<f64> {
        let start = Instant::now();

        loop {
            if let Some(value) = self.collectives.lock().unwrap().remove(&(epoch, from)) {
                return Ok(value);
            }
            if start.elapsed() > self.patience {
                return Err(Error::transport(format!(
                    "rank {} heard nothing from rank {} for {:?}",
                    self.rank(),
                    from,
                    self.patience
                )));
            }
            self.wait(COLLECTIVE_POLL)?;
        }
    }

    /**
     * Return the minimum of `value` over all workers. Values are reduced up
     * a binomial tree to rank 0 and the result is broadcast back down it.
     * Every worker must call this the same number of times.
     */
    pub fn all_reduce_min(&self, value: f64) -> Result<f64> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);
        let (up, down) = (2 * epoch, 2 * epoch + 1);
        self.collectives.lock().unwrap().retain(|key, _| key.0 >= up);
        let tree = BinomialTree::new(self.rank(), self.size());
        let children = tree.children();
        let mut result = value;

        for &child in &children {
            result = result.min(self.wait_collective(up, child)?);
        }
        if let Some(parent) = tree.parent() {
            self.send_envelope(parent, &Envelope::Collective { epoch: up, from: self.rank(), value: result })?;
            result = self.wait_collective(down, parent)?;
        }
        for &child in &children {
            self.send_envelope(child, &Envelope::Collective { epoch: down, from: self.rank(), value: result })?;
        }
        Ok(result)
    }

    /**
     * Block until every worker has reached the barrier.
     */
    pub fn barrier(&self) -> Result<()> {
        self.all_reduce_min(0.0).map(|_| ())
    }
}
