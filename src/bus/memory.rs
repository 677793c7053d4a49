//! In-process message bus
//!
//! Each partition is an append-only log. Consumers keep their own read
//! offsets, so several roles can read the same stream independently, which
//! mirrors how consumer groups behave on a broker.
//!
//! Logs are never truncated: memory grows with every payload flushed for the
//! life of the bus.

use crate::bus::{
    partition_for_key, BusError, BusResult, Consumer, ConsumerRole, MessageBus, Producer, Stream,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct StreamInner {
    name: &'static str,
    partitions: Vec<Mutex<Vec<Vec<u8>>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl StreamInner {
    fn partition(&self, partition_id: u32) -> BusResult<MutexGuard<'_, Vec<Vec<u8>>>> {
        let log = self
            .partitions
            .get(partition_id as usize)
            .ok_or(BusError::UnknownPartition {
                partition_id,
                partitions: self.partitions.len() as u32,
            })?;
        log.lock()
            .map_err(|_| BusError::Transport(format!("{} partition lock poisoned", self.name)))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A partitioned in-memory stream
#[derive(Clone)]
pub struct MemoryStream {
    inner: Arc<StreamInner>,
}

impl MemoryStream {
    pub fn new(name: &'static str, partitions: u32) -> Self {
        let partitions = partitions.max(1);
        Self {
            inner: Arc::new(StreamInner {
                name,
                partitions: (0..partitions).map(|_| Mutex::new(Vec::new())).collect(),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Closes the stream; blocked consumers wake up and further sends fail
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Number of payloads held by a partition
    pub fn len(&self, partition_id: u32) -> BusResult<usize> {
        Ok(self.inner.partition(partition_id)?.len())
    }

    pub fn is_empty(&self, partition_id: u32) -> BusResult<bool> {
        Ok(self.len(partition_id)? == 0)
    }
}

impl Stream for MemoryStream {
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    fn name(&self) -> &'static str {
        self.inner.name
    }

    fn partitions(&self) -> u32 {
        self.inner.partitions.len() as u32
    }

    fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            inner: Arc::clone(&self.inner),
            buffer: VecDeque::new(),
            next_partition: 0,
        }
    }

    fn consumer(
        &self,
        partition_id: Option<u32>,
        role: ConsumerRole,
    ) -> BusResult<MemoryConsumer> {
        let partitions = self.partitions();
        let assigned = match partition_id {
            Some(id) if id >= partitions => {
                return Err(BusError::UnknownPartition {
                    partition_id: id,
                    partitions,
                })
            }
            Some(id) => vec![id],
            None => (0..partitions).collect(),
        };

        tracing::debug!(
            stream = self.inner.name,
            role = role.as_str(),
            ?partition_id,
            "Created consumer"
        );

        Ok(MemoryConsumer {
            inner: Arc::clone(&self.inner),
            offsets: assigned.iter().map(|id| (*id, 0)).collect(),
            cursor: 0,
            role,
        })
    }
}

/// Buffers payloads until `flush`
pub struct MemoryProducer {
    inner: Arc<StreamInner>,
    buffer: VecDeque<(u32, Vec<u8>)>,
    next_partition: u32,
}

impl MemoryProducer {
    /// Number of payloads waiting for `flush`
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Producer for MemoryProducer {
    fn send(&mut self, key: Option<&[u8]>, payload: Vec<u8>) -> BusResult<()> {
        if self.inner.is_closed() {
            return Err(BusError::Closed {
                stream: self.inner.name,
            });
        }

        let partitions = self.inner.partitions.len() as u32;
        let partition_id = match key {
            Some(key) => partition_for_key(key, partitions),
            None => {
                let id = self.next_partition % partitions;
                self.next_partition = self.next_partition.wrapping_add(1);
                id
            }
        };
        self.buffer.push_back((partition_id, payload));
        Ok(())
    }

    fn flush(&mut self) -> BusResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.inner.is_closed() {
            return Err(BusError::Closed {
                stream: self.inner.name,
            });
        }

        // Payloads leave the buffer only once written; a failed flush can be
        // retried without loss.
        let mut written = 0;
        let result = loop {
            let Some(&(partition_id, _)) = self.buffer.front() else {
                break Ok(());
            };
            match self.inner.partition(partition_id) {
                Ok(mut log) => {
                    if let Some((_, payload)) = self.buffer.pop_front() {
                        log.push(payload);
                        written += 1;
                    }
                }
                Err(e) => break Err(e),
            }
        };

        if written > 0 {
            self.inner.notify.notify_waiters();
        }
        if let Err(e) = &result {
            tracing::warn!(stream = self.inner.name, written, pending = self.buffer.len(), error = %e, "Flush stopped early");
        }
        result
    }

    fn get_offset(&self, partition_id: u32) -> BusResult<u64> {
        Ok(self.inner.partition(partition_id)?.len() as u64)
    }
}

/// Reads one or all partitions of a stream
pub struct MemoryConsumer {
    inner: Arc<StreamInner>,
    offsets: Vec<(u32, u64)>,
    cursor: usize,
    role: ConsumerRole,
}

impl MemoryConsumer {
    pub fn role(&self) -> ConsumerRole {
        self.role
    }

    /// Takes available payloads, rotating the starting partition so a busy
    /// partition cannot hide the others
    fn poll(&mut self, count: usize) -> BusResult<Vec<Vec<u8>>> {
        let mut batch = Vec::new();
        let assigned = self.offsets.len();

        for step in 0..assigned {
            if batch.len() >= count {
                break;
            }
            let index = (self.cursor + step) % assigned;
            let (partition_id, offset) = self.offsets[index];
            let log = self.inner.partition(partition_id)?;

            let start = offset as usize;
            let end = log.len().min(start + (count - batch.len()));
            if start < end {
                batch.extend(log[start..end].iter().cloned());
                self.offsets[index].1 = end as u64;
            }
        }

        self.cursor = (self.cursor + 1) % assigned.max(1);
        Ok(batch)
    }
}

impl Consumer for MemoryConsumer {
    async fn get_messages(&mut self, timeout: Duration, count: usize) -> BusResult<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + timeout;
        let inner = Arc::clone(&self.inner);
        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            // Register before polling so a flush between poll and wait is seen.
            notified.as_mut().enable();

            let batch = self.poll(count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if inner.is_closed() {
                return Err(BusError::Closed { stream: inner.name });
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn get_offset(&self, partition_id: u32) -> BusResult<u64> {
        self.offsets
            .iter()
            .find(|(id, _)| *id == partition_id)
            .map(|(_, offset)| *offset)
            .ok_or(BusError::UnknownPartition {
                partition_id,
                partitions: self.inner.partitions.len() as u32,
            })
    }
}

/// In-process bus with spider log, spider feed and scoring log streams
#[derive(Clone)]
pub struct MemoryBus {
    spider_log: MemoryStream,
    spider_feed: MemoryStream,
    scoring_log: MemoryStream,
}

impl MemoryBus {
    /// Creates a bus; the scoring log always has a single partition
    pub fn new(spider_log_partitions: u32, spider_feed_partitions: u32) -> Self {
        Self {
            spider_log: MemoryStream::new("spider-log", spider_log_partitions),
            spider_feed: MemoryStream::new("spider-feed", spider_feed_partitions),
            scoring_log: MemoryStream::new("scoring-log", 1),
        }
    }

    pub fn from_config(config: &crate::config::BusConfig) -> Self {
        Self::new(config.spider_log_partitions, config.spider_feed_partitions)
    }

    /// Closes every stream
    pub fn close(&self) {
        self.spider_log.close();
        self.spider_feed.close();
        self.scoring_log.close();
    }
}

impl MessageBus for MemoryBus {
    type Stream = MemoryStream;

    fn spider_log(&self) -> MemoryStream {
        self.spider_log.clone()
    }

    fn spider_feed(&self) -> MemoryStream {
        self.spider_feed.clone()
    }

    fn scoring_log(&self) -> MemoryStream {
        self.scoring_log.clone()
    }
}
