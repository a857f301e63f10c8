use anyhow::{Result, anyhow};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use uuid::Uuid;

/// One requested conversion of one stored object.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub bucket: String,
    pub key: String,
    pub file_type: String,
}

impl Job {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bucket: bucket.into(),
            key: key.into(),
            file_type: file_type.into(),
        }
    }
}

/// Producer side, cloned into every request handler.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side, owned by the single worker.
#[derive(Debug)]
pub struct JobReceiver {
    receiver: UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
}

pub fn job_queue() -> (JobQueue, JobReceiver) {
    let (sender, receiver) = unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        JobQueue {
            sender,
            depth: depth.clone(),
        },
        JobReceiver { receiver, depth },
    )
}

impl JobQueue {
    /// Never blocks. Fails only once the worker side is gone.
    pub fn submit(&self, job: Job) -> Result<()> {
        // Counted before sending so the worker can never decrement first.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.sender.send(job) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!(
                "Conversion worker is not running, job {} was rejected",
                err.0.id
            ));
        }
        Ok(())
    }

    /// Jobs submitted but not yet taken by the worker.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobReceiver {
    /// Waits for the next job; `None` once every producer is dropped.
    pub async fn recv(&mut self) -> Option<Job> {
        let job = self.receiver.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn depth_tracks_submissions_until_dequeued() {
        let (queue, mut receiver) = job_queue();
        assert!(queue.is_empty());

        queue.submit(Job::new("b", "first.pdf", "pdf")).unwrap();
        queue.submit(Job::new("b", "second.pdf", "pdf")).unwrap();
        assert_eq!(queue.len(), 2);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.key, "first.pdf");
        assert_eq!(queue.len(), 1);
        assert_eq!(receiver.pending(), 1);

        let second = receiver.recv().await.unwrap();
        assert_eq!(second.key, "second.pdf");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn resubmitting_the_same_key_queues_independent_jobs() {
        let (queue, mut receiver) = job_queue();
        let a = Job::new("b", "same.pdf", "pdf");
        let b = Job::new("b", "same.pdf", "pdf");
        assert_ne!(a.id, b.id);
        queue.submit(a).unwrap();
        queue.submit(b).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_some());
    }

    #[test]
    fn submit_fails_without_a_worker() {
        let (queue, receiver) = job_queue();
        drop(receiver);
        assert!(queue.submit(Job::new("b", "k.pdf", "pdf")).is_err());
        assert_eq!(queue.len(), 0);
    }
}
