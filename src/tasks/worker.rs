use std::sync::{Arc, Mutex};

/// Counts the live block-fetcher workers. A worker that ran past the chain
/// tip may quit only while at least one other remains.
#[derive(Clone)]
pub struct Worker {
    count: Arc<Mutex<u8>>,
}

impl Worker {
    pub fn new() -> Self {
        Worker {
            count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn add(&self) -> u8 {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        *count
    }

    pub fn num(&self) -> u8 {
        let count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count
    }

    /// Decrements and allows quitting only if another worker stays behind.
    pub fn should_quit(&self) -> bool {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        if *count > 1 {
            *count -= 1;
            return true;
        }
        false
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_worker_never_quits() {
        let worker = Worker::new();
        assert_eq!(worker.add(), 1);
        assert!(!worker.should_quit());
        assert_eq!(worker.num(), 1);

        assert_eq!(worker.add(), 2);
        assert!(worker.should_quit());
        assert_eq!(worker.num(), 1);
        assert!(!worker.should_quit());
    }
}
