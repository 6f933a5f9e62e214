// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bounded observation queue
//!
//! The stream worker pushes one [`Sample`] per satellite per SKY report;
//! the scrape handler drains everything at once. When the scraper falls
//! behind, the oldest samples are evicted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use gpsd_stream::Record;

/// One observation of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Entity key (satellite PRN)
    pub id: String,
    /// Every field of the sub-record at capture time
    pub fields: Record,
    /// When the sample was taken
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    /// Capture a sample now
    pub fn new(id: impl Into<String>, fields: Record) -> Self {
        Self {
            id: id.into(),
            fields,
            captured_at: Utc::now(),
        }
    }
}

/// Capacity-bounded FIFO shared by one producer and the scrape handler
#[derive(Debug)]
pub struct ObservationQueue {
    samples: Mutex<VecDeque<Sample>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl ObservationQueue {
    /// Create an empty queue holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Sample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample, evicting from the front while over capacity
    pub fn push(&self, sample: Sample) {
        let mut samples = self.lock();
        samples.push_back(sample);
        while samples.len() > self.capacity {
            samples.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take every queued sample, oldest first
    pub fn drain(&self) -> Vec<Sample> {
        self.lock().drain(..).collect()
    }

    /// Samples currently queued
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of samples kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples dropped by the capacity cap since start
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sample(id: &str, ss: f64) -> Sample {
        let record = Record::decode(&format!("{{\"PRN\":{},\"ss\":{}}}", id, ss)).unwrap();
        Sample::new(id, record)
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = ObservationQueue::new(3);
        for i in 0..4 {
            queue.push(sample(&i.to_string(), i as f64));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted(), 1);
        let ids: Vec<_> = queue.drain().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = ObservationQueue::new(10);
        queue.push(sample("5", 30.0));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let queue = ObservationQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(sample("1", 1.0));
        queue.push(sample("2", 2.0));
        assert_eq!(queue.drain()[0].id, "2");
    }

    #[test]
    fn test_concurrent_push_and_drain() {
        let queue = Arc::new(ObservationQueue::new(100));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..10_000 {
                    queue.push(sample(&(i % 32).to_string(), i as f64));
                }
            })
        };

        let mut drained = 0;
        while !producer.is_finished() {
            let batch = queue.drain();
            assert!(batch.len() <= 100);
            drained += batch.len();
        }
        producer.join().unwrap();
        drained += queue.drain().len();

        assert_eq!(drained as u64 + queue.evicted(), 10_000);
    }
}
