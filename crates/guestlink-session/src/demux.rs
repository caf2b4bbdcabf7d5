use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use guestlink_frame::address::ENTITY_SLOTS;
use guestlink_frame::{Address, EntityKind, StdStream, Substream, MAX_PAYLOAD};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SessionError};
use crate::exec::{ExecSpec, ExecStatus, ExitStatus, SignalRequest, WindowSize};
use crate::session::{Message, Session};
use crate::sink::Sink;

/// Identifies one registered consumer.
pub type ConsumerId = u64;

/// Demultiplexer configuration.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// How long an exited exec stays queryable.
    pub exit_grace: Duration,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            exit_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
struct Consumer {
    id: ConsumerId,
    sink: Arc<Mutex<Sink>>,
}

struct ExecRecord {
    spec: ExecSpec,
    running: bool,
    exit_code: Option<i32>,
    consumer: Option<Consumer>,
    generation: u64,
}

type ExecTable = Vec<Option<ExecRecord>>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fans one session's messages out to per-entity consumers.
///
/// Containers keep any number of consumers. Execs keep at most one, plus the
/// bookkeeping needed to answer status queries until a grace period after
/// exit. Consumer writes happen outside the table locks.
pub struct Demultiplexer {
    session: Arc<Session>,
    config: DemuxConfig,
    containers: StdMutex<Vec<Vec<Consumer>>>,
    execs: Arc<StdMutex<ExecTable>>,
    next_id: AtomicU64,
    cleanup: CancellationToken,
}

impl Demultiplexer {
    pub fn new(session: Arc<Session>, config: DemuxConfig) -> Self {
        Self {
            session,
            config,
            containers: StdMutex::new(vec![Vec::new(); ENTITY_SLOTS]),
            execs: Arc::new(StdMutex::new((0..ENTITY_SLOTS).map(|_| None).collect())),
            next_id: AtomicU64::new(1),
            cleanup: CancellationToken::new(),
        }
    }

    /// The session this demultiplexer reads from.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Process inbound messages until the session fails or closes.
    ///
    /// Deadline errors are ignored; liveness is the keep-alive's call. On
    /// exit every consumer is closed and all entity state is dropped.
    pub async fn run(&self) -> Result<()> {
        let result = loop {
            match self.session.read().await {
                Ok(message) => self.dispatch(message).await,
                Err(err) if err.is_deadline() => continue,
                Err(err) => break err,
            }
        };
        debug!(error = %result, "demultiplexer stopping");
        self.teardown().await;
        Err(result)
    }

    async fn dispatch(&self, message: Message) {
        let address = match Address::from_key(message.key) {
            Ok(address) => address,
            Err(_) => {
                warn!(key = message.key, "dropping message for unknown key");
                return;
            }
        };

        match address.substream {
            Substream::Stdin => self.broadcast(address, StdStream::Stdin, &message.value).await,
            Substream::Stdout => self.broadcast(address, StdStream::Stdout, &message.value).await,
            Substream::Stderr => self.broadcast(address, StdStream::Stderr, &message.value).await,
            Substream::CloseStdout | Substream::CloseStderr => {
                trace!(%address, "stream closed by peer");
                self.close_consumers(address.kind, address.index).await;
            }
            Substream::Exit => self.on_exit(address, &message.value).await,
            Substream::Status | Substream::Winch | Substream::ExecStart | Substream::Signal => {
                debug!(%address, "ignoring request on outbound-only substream");
            }
        }
    }

    fn consumers(&self, kind: EntityKind, index: u8) -> Vec<Consumer> {
        let slot = usize::from(index);
        match kind {
            EntityKind::Container => lock(&self.containers)[slot].clone(),
            EntityKind::Exec => lock(&self.execs)[slot]
                .as_ref()
                .and_then(|record| record.consumer.clone())
                .into_iter()
                .collect(),
        }
    }

    async fn broadcast(&self, address: Address, stream: StdStream, payload: &[u8]) {
        let consumers = self.consumers(address.kind, address.index);
        if consumers.is_empty() {
            trace!(%address, "no consumers");
            return;
        }

        let mut failed = Vec::new();
        for consumer in &consumers {
            let result = consumer.sink.lock().await.write(stream, payload).await;
            if let Err(err) = result {
                warn!(%address, consumer = consumer.id, error = %err, "dropping failed consumer");
                failed.push(consumer.id);
            }
        }
        if !failed.is_empty() {
            self.remove_where(address.kind, address.index, |id| failed.contains(&id));
        }
    }

    fn remove_where(&self, kind: EntityKind, index: u8, remove: impl Fn(ConsumerId) -> bool) {
        let slot = usize::from(index);
        match kind {
            EntityKind::Container => lock(&self.containers)[slot].retain(|c| !remove(c.id)),
            EntityKind::Exec => {
                if let Some(record) = lock(&self.execs)[slot].as_mut() {
                    if record.consumer.as_ref().is_some_and(|c| remove(c.id)) {
                        record.consumer = None;
                    }
                }
            }
        }
    }

    fn take_consumers(&self, kind: EntityKind, index: u8) -> Vec<Consumer> {
        let slot = usize::from(index);
        match kind {
            EntityKind::Container => std::mem::take(&mut lock(&self.containers)[slot]),
            EntityKind::Exec => lock(&self.execs)[slot]
                .as_mut()
                .and_then(|record| record.consumer.take())
                .into_iter()
                .collect(),
        }
    }

    async fn close_consumers(&self, kind: EntityKind, index: u8) {
        for consumer in self.take_consumers(kind, index) {
            close_sink(&consumer).await;
        }
    }

    async fn on_exit(&self, address: Address, payload: &[u8]) {
        let code = match serde_json::from_slice::<ExitStatus>(payload) {
            Ok(status) => status.code,
            Err(err) => {
                warn!(%address, error = %err, "malformed exit payload");
                -1
            }
        };

        match address.kind {
            EntityKind::Container => {
                info!(index = address.index, code, "container exited");
                self.close_consumers(address.kind, address.index).await;
            }
            EntityKind::Exec => {
                let slot = usize::from(address.index);
                let (consumer, generation) = {
                    let mut execs = lock(&self.execs);
                    match execs[slot].as_mut() {
                        Some(record) => {
                            record.running = false;
                            record.exit_code = Some(code);
                            (record.consumer.take(), Some(record.generation))
                        }
                        None => (None, None),
                    }
                };

                let Some(generation) = generation else {
                    debug!(index = address.index, code, "exit for unknown exec");
                    return;
                };
                info!(index = address.index, code, "exec exited");
                if let Some(consumer) = consumer {
                    close_sink(&consumer).await;
                }
                self.schedule_cleanup(address.index, generation);
            }
        }
    }

    fn schedule_cleanup(&self, index: u8, generation: u64) {
        let execs = Arc::clone(&self.execs);
        let cancel = self.cleanup.clone();
        let grace = self.config.exit_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(grace) => {}
            }
            let mut execs = lock(&execs);
            let slot = &mut execs[usize::from(index)];
            if slot
                .as_ref()
                .is_some_and(|record| record.generation == generation && !record.running)
            {
                *slot = None;
                trace!(index, "exec record removed");
            }
        });
    }

    async fn teardown(&self) {
        self.cleanup.cancel();
        let mut consumers: Vec<Consumer> = lock(&self.containers)
            .iter_mut()
            .flat_map(std::mem::take)
            .collect();
        consumers.extend(
            lock(&self.execs)
                .iter_mut()
                .filter_map(|slot| slot.take().and_then(|record| record.consumer)),
        );
        for consumer in consumers {
            close_sink(&consumer).await;
        }
    }

    async fn send(
        &self,
        kind: EntityKind,
        index: u8,
        substream: Substream,
        value: Bytes,
    ) -> Result<()> {
        let key = Address::new(kind, index, substream)?.key();
        self.session.write(&Message::new(key, 0, value)).await
    }

    /// Register `sink` for an entity's output.
    ///
    /// Containers accept any number of consumers. An exec must exist and
    /// accepts one.
    pub fn attach(&self, kind: EntityKind, index: u8, sink: Sink) -> Result<ConsumerId> {
        let address = Address::new(kind, index, Substream::Stdout)?;
        let consumer = Consumer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sink: Arc::new(Mutex::new(sink)),
        };
        let id = consumer.id;
        let slot = usize::from(address.index);

        match kind {
            EntityKind::Container => lock(&self.containers)[slot].push(consumer),
            EntityKind::Exec => {
                let mut execs = lock(&self.execs);
                let record = execs[slot]
                    .as_mut()
                    .filter(|record| record.running)
                    .ok_or_else(|| SessionError::Exec(format!("exec {index} is not running")))?;
                if record.consumer.is_some() {
                    return Err(SessionError::Exec(format!("exec {index} already attached")));
                }
                record.consumer = Some(consumer);
            }
        }
        debug!(%address, consumer = id, "consumer attached");
        Ok(id)
    }

    /// Unregister a consumer without closing it. Returns false if unknown.
    pub fn detach(&self, kind: EntityKind, index: u8, id: ConsumerId) -> bool {
        if index > guestlink_frame::MAX_INDEX {
            return false;
        }
        let before = self.consumer_count(kind, index);
        self.remove_where(kind, index, |candidate| candidate == id);
        self.consumer_count(kind, index) < before
    }

    /// Number of consumers registered for an entity.
    pub fn consumer_count(&self, kind: EntityKind, index: u8) -> usize {
        if index > guestlink_frame::MAX_INDEX {
            return 0;
        }
        self.consumers(kind, index).len()
    }

    /// Create an exec record and ask the peer to start it.
    pub async fn start_exec(
        &self,
        index: u8,
        spec: ExecSpec,
        consumer: Option<Sink>,
    ) -> Result<Option<ConsumerId>> {
        spec.validate()?;
        let address = Address::new(EntityKind::Exec, index, Substream::ExecStart)?;
        let payload = Bytes::from(serde_json::to_vec(&spec)?);
        if payload.len() > MAX_PAYLOAD {
            return Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let consumer = consumer.map(|sink| Consumer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sink: Arc::new(Mutex::new(sink)),
        });
        let consumer_id = consumer.as_ref().map(|c| c.id);
        let generation = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut execs = lock(&self.execs);
            let slot = &mut execs[usize::from(index)];
            if slot.as_ref().is_some_and(|record| record.running) {
                return Err(SessionError::Exec(format!("exec slot {index} is busy")));
            }
            *slot = Some(ExecRecord {
                spec,
                running: true,
                exit_code: None,
                consumer,
                generation,
            });
        }

        if let Err(err) = self
            .send(EntityKind::Exec, index, Substream::ExecStart, payload)
            .await
        {
            let mut execs = lock(&self.execs);
            let slot = &mut execs[usize::from(index)];
            if slot.as_ref().is_some_and(|r| r.generation == generation) {
                *slot = None;
            }
            return Err(err);
        }
        debug!(%address, "exec requested");
        Ok(consumer_id)
    }

    /// Current state of an exec, if its record still exists.
    pub fn exec_status(&self, index: u8) -> Option<ExecStatus> {
        if index > guestlink_frame::MAX_INDEX {
            return None;
        }
        lock(&self.execs)[usize::from(index)]
            .as_ref()
            .map(|record| ExecStatus {
                spec: record.spec.clone(),
                running: record.running,
                exit_code: record.exit_code,
            })
    }

    /// Forward input to an entity's STDIN, split into frame-sized chunks.
    pub async fn write_stdin(&self, kind: EntityKind, index: u8, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_PAYLOAD) {
            self.send(kind, index, Substream::Stdin, Bytes::copy_from_slice(chunk))
                .await?;
        }
        Ok(())
    }

    /// Tell the peer a terminal was resized.
    pub async fn resize(&self, kind: EntityKind, index: u8, rows: u16, cols: u16) -> Result<()> {
        let payload = serde_json::to_vec(&WindowSize { rows, cols })?;
        self.send(kind, index, Substream::Winch, payload.into()).await
    }

    /// Ask the peer to deliver `signal` to an entity.
    pub async fn signal(&self, kind: EntityKind, index: u8, signal: i32) -> Result<()> {
        let payload = serde_json::to_vec(&SignalRequest { signal })?;
        self.send(kind, index, Substream::Signal, payload.into()).await
    }

    /// Push an opaque status update for a container.
    pub async fn push_status(&self, index: u8, status: impl Into<Bytes>) -> Result<()> {
        self.send(EntityKind::Container, index, Substream::Status, status.into())
            .await
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) {
        self.cleanup.cancel();
    }
}

async fn close_sink(consumer: &Consumer) {
    if let Err(err) = consumer.sink.lock().await.close().await {
        debug!(consumer = consumer.id, error = %err, "consumer close failed");
    }
}
