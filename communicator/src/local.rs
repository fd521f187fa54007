use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::{CommError, Transport};

type Packet = (usize, Vec<f64>);

/// One endpoint of an in-process world: every rank runs on its own thread
/// and talks to its peers over unbounded mpsc channels.
///
/// Channels deliver in order per sender, which is all the chain topology
/// needs. Messages from a rank other than the one currently awaited are
/// parked in per-source pending queues.
pub struct LocalComm {
    rank: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Mutex<Receiver<Packet>>,
    pending: Mutex<Vec<VecDeque<Vec<f64>>>>,
}

/// Completed as soon as it is posted: unbounded channels never block the
/// sender.
pub struct LocalSendRequest {
    buf: Vec<f64>,
}

/// Deferred until waited on; the message sits in the channel meanwhile.
pub struct LocalRecvRequest {
    buf: Vec<f64>,
    from: usize,
}

/// Build a fully connected world of `size` endpoints, one per rank.
pub fn local_world(size: usize) -> Vec<LocalComm> {
    log::debug!("creating in-process world of {size} ranks");
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();

    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| LocalComm {
            rank,
            peers: senders.clone(),
            inbox: Mutex::new(inbox),
            pending: Mutex::new(vec![VecDeque::new(); size]),
        })
        .collect()
}

impl LocalComm {
    fn next_from(&self, from: usize) -> Result<Vec<f64>, CommError> {
        if let Some(data) = self.pending.lock().unwrap()[from].pop_front() {
            return Ok(data);
        }

        let inbox = self.inbox.lock().unwrap();
        loop {
            let (src, data) = inbox.recv().map_err(|_| CommError::Disconnected(from))?;
            if src == from {
                return Ok(data);
            }
            self.pending.lock().unwrap()[src].push_back(data);
        }
    }

    fn deliver(&self, data: &[f64], buf: &mut [f64]) -> Result<usize, CommError> {
        if data.len() > buf.len() {
            return Err(CommError::Truncated { got: data.len(), cap: buf.len() });
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

impl Transport for LocalComm {
    type SendRequest = LocalSendRequest;
    type RecvRequest = LocalRecvRequest;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, buf: &[f64], to: usize) -> Result<(), CommError> {
        self.peers[to]
            .send((self.rank, buf.to_vec()))
            .map_err(|_| CommError::Disconnected(to))
    }

    fn recv(&self, buf: &mut [f64], from: usize) -> Result<usize, CommError> {
        let data = self.next_from(from)?;
        self.deliver(&data, buf)
    }

    fn send_recv(&self, sbuf: &[f64], to: usize, rbuf: &mut [f64], from: usize) -> Result<usize, CommError> {
        self.send(sbuf, to)?;
        self.recv(rbuf, from)
    }

    fn isend(&self, buf: Vec<f64>, len: usize, to: usize) -> Result<Self::SendRequest, CommError> {
        self.send(&buf[..len], to)?;
        Ok(LocalSendRequest { buf })
    }

    fn irecv(&self, buf: Vec<f64>, from: usize) -> Result<Self::RecvRequest, CommError> {
        Ok(LocalRecvRequest { buf, from })
    }

    fn wait_send(&self, req: Self::SendRequest) -> Result<Vec<f64>, CommError> {
        Ok(req.buf)
    }

    fn wait_recv(&self, req: Self::RecvRequest) -> Result<(Vec<f64>, usize), CommError> {
        let LocalRecvRequest { mut buf, from } = req;
        let data = self.next_from(from)?;
        let n = self.deliver(&data, &mut buf)?;
        Ok((buf, n))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn messages_arrive_in_order_per_sender() {
        let mut world = local_world(2);
        let c1 = world.pop().unwrap();
        let c0 = world.pop().unwrap();

        let t = thread::spawn(move || {
            c0.send(&[1.0], 1).unwrap();
            c0.send(&[2.0, 3.0], 1).unwrap();
        });

        let mut buf = [0.0; 4];
        assert_eq!(c1.recv(&mut buf, 0).unwrap(), 1);
        assert_eq!(buf[0], 1.0);
        assert_eq!(c1.recv(&mut buf, 0).unwrap(), 2);
        assert_eq!(&buf[..2], &[2.0, 3.0]);
        t.join().unwrap();
    }

    #[test]
    fn pending_queue_keeps_sources_apart() {
        let mut world = local_world(3);
        let c2 = world.pop().unwrap();
        let c1 = world.pop().unwrap();
        let c0 = world.pop().unwrap();

        c0.send(&[10.0], 2).unwrap();
        c1.send(&[20.0], 2).unwrap();

        let mut buf = [0.0; 1];
        // ask for rank 1 first even though rank 0's message arrived earlier
        c2.recv(&mut buf, 1).unwrap();
        assert_eq!(buf[0], 20.0);
        c2.recv(&mut buf, 0).unwrap();
        assert_eq!(buf[0], 10.0);
    }

    #[test]
    fn truncation_is_fatal() {
        let mut world = local_world(2);
        let c1 = world.pop().unwrap();
        let c0 = world.pop().unwrap();

        c0.send(&[1.0, 2.0, 3.0], 1).unwrap();
        let mut small = [0.0; 2];
        assert!(matches!(c1.recv(&mut small, 0), Err(CommError::Truncated { got: 3, cap: 2 })));
    }

    #[test]
    fn nonblocking_round_trip() {
        let mut world = local_world(2);
        let c1 = world.pop().unwrap();
        let c0 = world.pop().unwrap();

        let sreq = c0.isend(vec![5.0, 6.0, 0.0], 2, 1).unwrap();
        let rreq = c1.irecv(vec![0.0; 8], 0).unwrap();

        let sbuf = c0.wait_send(sreq).unwrap();
        assert_eq!(sbuf.len(), 3);
        let (rbuf, n) = c1.wait_recv(rreq).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&rbuf[..2], &[5.0, 6.0]);
    }
}
