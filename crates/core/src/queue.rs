//! Ordered holding area for outstanding commands.
//!
//! A client keeps three of these: requests waiting for the TCP connection,
//! requests waiting for their response, and requests waiting for the HTTP
//! tunnel. Order is FIFO except for explicit head reinsertion.

use std::collections::VecDeque;

use crate::protocol::RequestRecord;

#[derive(Debug, Default)]
pub struct RequestQueue {
    records: VecDeque<RequestRecord>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    pub fn enqueue(&mut self, request: RequestRecord) {
        self.records.push_back(request);
    }

    /// Remove and return the oldest request.
    pub fn dequeue_head(&mut self) -> Option<RequestRecord> {
        self.records.pop_front()
    }

    /// Put a request back in front of everything else (retry ahead of newer commands).
    pub fn requeue_at_head(&mut self, request: RequestRecord) {
        self.records.push_front(request);
    }

    /// Remove the request with the given CSeq, wherever it sits.
    pub fn find_and_remove(&mut self, cseq: u32) -> Option<RequestRecord> {
        let pos = self.records.iter().position(|r| r.cseq() == cseq)?;
        self.records.remove(pos)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Remove every request, oldest first.
    pub fn drain_all(&mut self) -> Vec<RequestRecord> {
        self.records.drain(..).collect()
    }

    /// Remove the requests matching `pred`, preserving the order of the rest.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&RequestRecord) -> bool) -> Vec<RequestRecord> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.records.len());
        for record in self.records.drain(..) {
            if pred(&record) {
                removed.push(record);
            } else {
                kept.push_back(record);
            }
        }
        self.records = kept;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Reply, RtspClient};
    use crate::protocol::Method;

    fn record(cseq: u32) -> RequestRecord {
        RequestRecord::new(cseq, Method::Options, Box::new(|_: &RtspClient, _: Reply| {}))
    }

    fn cseqs(queue: &mut RequestQueue) -> Vec<u32> {
        queue.drain_all().iter().map(|r| r.cseq()).collect()
    }

    #[test]
    fn fifo_order() {
        let mut queue = RequestQueue::new();
        assert!(queue.is_empty());
        queue.enqueue(record(2));
        queue.enqueue(record(3));
        queue.enqueue(record(4));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue_head().map(|r| r.cseq()), Some(2));
        assert_eq!(cseqs(&mut queue), vec![3, 4]);
        assert!(queue.dequeue_head().is_none());
    }

    #[test]
    fn requeue_goes_ahead_of_newer() {
        let mut queue = RequestQueue::new();
        queue.enqueue(record(5));
        queue.enqueue(record(6));
        let head = queue.dequeue_head().unwrap();
        queue.enqueue(record(7));
        queue.requeue_at_head(head);
        assert_eq!(cseqs(&mut queue), vec![5, 6, 7]);
    }

    #[test]
    fn find_and_remove_out_of_order() {
        let mut queue = RequestQueue::new();
        for cseq in 2..6 {
            queue.enqueue(record(cseq));
        }
        assert_eq!(queue.find_and_remove(4).map(|r| r.cseq()), Some(4));
        assert!(queue.find_and_remove(4).is_none());
        assert!(queue.find_and_remove(99).is_none());
        assert_eq!(cseqs(&mut queue), vec![2, 3, 5]);
    }

    #[test]
    fn remove_where_keeps_order() {
        let mut queue = RequestQueue::new();
        for cseq in 2..8 {
            queue.enqueue(record(cseq));
        }
        let removed: Vec<u32> = queue
            .remove_where(|r| r.cseq() % 2 == 0)
            .iter()
            .map(|r| r.cseq())
            .collect();
        assert_eq!(removed, vec![2, 4, 6]);
        assert_eq!(cseqs(&mut queue), vec![3, 5, 7]);
    }
}
