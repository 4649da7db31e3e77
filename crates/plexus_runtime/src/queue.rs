use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use plexus_envelope::Envelope;

/// FIFO of envelopes waiting for the worker, guarded by a mutex and a
/// condition variable that wakes the worker when work arrives
#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Envelope>>,
    has_work: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: Envelope) {
        let mut jobs = self.jobs.lock();
        jobs.push_back(job);
        self.has_work.notify_one();
    }

    /// Take the oldest job, waiting until there is one
    pub fn pop(&self) -> Envelope {
        let mut jobs = self.jobs.lock();
        loop {
            if let Some(job) = jobs.pop_front() {
                return job;
            }
            self.has_work.wait(&mut jobs);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_envelope::{Address, Call};
    use std::sync::Arc;
    use std::thread;

    fn job(id: u64) -> Envelope {
        Envelope::Method(Call::new(id, Address::local("m"), &()).unwrap())
    }

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new();
        for id in 0..5 {
            queue.push(job(id));
        }
        assert_eq!(queue.len(), 5);
        for id in 0..5 {
            assert_eq!(queue.pop().call().map(|c| c.id), Some(id));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_waits_for_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || (0..100).map(|_| queue.pop().call().unwrap().id).collect::<Vec<_>>())
        };

        for id in 0..100 {
            queue.push(job(id));
        }

        assert_eq!(consumer.join().unwrap(), (0..100).collect::<Vec<_>>());
    }
}
