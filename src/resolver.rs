//! Browse and lookup client for DNS-SD services.
//!
//! Each browse or lookup binds its own multicast sockets, re-queries on an
//! exponential backoff schedule and merges incoming responses into a
//! de-duplicated stream of [`ServiceEntry`] values. An instance moves
//! through PENDING (candidate seen) to READY (SRV, TXT and at least one
//! address observed, emitted once); a TTL-0 record withdraws it and the
//! stream yields the same entry with `ttl == 0`.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::{Name, RData, Record};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::MdnsError;
use crate::message;
use crate::metrics;
use crate::service::{ServiceEntry, ServiceRecord};
use crate::socket::{MulticastSockets, MAX_PACKET};

/// First re-query delay; doubles per RFC 6762 §5.2.
const INITIAL_REQUERY: Duration = Duration::from_secs(4);

/// Re-query backoff ceiling.
const MAX_REQUERY: Duration = Duration::from_secs(60);

/// Client side of the library: discovers services published by peers.
#[derive(Debug, Default, Clone)]
pub struct Resolver {
    interfaces: Vec<String>,
}

impl Resolver {
    /// Resolver listening on every OS interface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver restricted to the named interfaces.
    pub fn with_interfaces(interfaces: Vec<String>) -> Self {
        Self { interfaces }
    }

    /// Browse for all instances of a service type.
    ///
    /// Entries are emitted once complete; a withdrawal is the same entry
    /// with `ttl == 0`. The stream closes when `cancel` fires or the
    /// stream is dropped. Must be called from within a Tokio runtime.
    pub fn browse(
        &self,
        service: &str,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceStream, MdnsError> {
        if service.is_empty() {
            return Err(MdnsError::MissingField("service"));
        }
        self.start(ServiceRecord::new("", service, domain), QueryKind::Browse, cancel)
    }

    /// Look up one specific service instance.
    ///
    /// The stream yields at most one entry, as soon as SRV, TXT and one
    /// address have been collected, then closes.
    pub fn lookup(
        &self,
        instance: &str,
        service: &str,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceStream, MdnsError> {
        if instance.is_empty() {
            return Err(MdnsError::MissingField("instance"));
        }
        if service.is_empty() {
            return Err(MdnsError::MissingField("service"));
        }
        self.start(
            ServiceRecord::new(instance, service, domain),
            QueryKind::Lookup,
            cancel,
        )
    }

    fn start(
        &self,
        record: ServiceRecord,
        kind: QueryKind,
        cancel: &CancellationToken,
    ) -> Result<ServiceStream, MdnsError> {
        let sockets = MulticastSockets::bind(&self.interfaces)?;
        let token = cancel.child_token();
        let tracker = Arc::new(Mutex::new(InstanceTracker::new(&record, kind)?));
        let (tx, rx) = mpsc::unbounded_channel();

        for sock in [sockets.v4.clone(), sockets.v6.clone()].into_iter().flatten() {
            tokio::spawn(recv_loop(
                sock,
                tracker.clone(),
                tx.clone(),
                token.clone(),
                kind,
            ));
        }
        tokio::spawn(query_loop(sockets, record, kind, token.clone()));

        Ok(ServiceStream { rx, token })
    }
}

/// What a discovery session is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Browse,
    Lookup,
}

/// Send the initial query, then re-query with exponential backoff.
async fn query_loop(
    sockets: MulticastSockets,
    record: ServiceRecord,
    kind: QueryKind,
    cancel: CancellationToken,
) {
    let mut interval = INITIAL_REQUERY;
    loop {
        let composed = match kind {
            QueryKind::Browse => message::browse_query(&record),
            QueryKind::Lookup => message::lookup_query(&record),
        };
        match composed.and_then(|m| Ok(m.to_vec()?)) {
            Ok(buf) => sockets.send_multicast(&buf).await,
            Err(e) => warn!("failed to compose discovery query: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        interval = (interval * 2).min(MAX_REQUERY);
    }
    trace!("discovery query loop exited");
}

/// Receive responses on one socket and feed the tracker.
async fn recv_loop(
    sock: Arc<UdpSocket>,
    tracker: Arc<Mutex<InstanceTracker>>,
    tx: mpsc::UnboundedSender<ServiceEntry>,
    cancel: CancellationToken,
    kind: QueryKind,
) {
    let mut buf = vec![0u8; MAX_PACKET];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = sock.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    let msg = match message::decode(&buf[..len]) {
                        Ok(msg) => {
                            metrics::record_packet("decoded");
                            msg
                        }
                        Err(e) => {
                            metrics::record_packet("dropped");
                            debug!(%from, "dropped undecodable packet: {}", e);
                            continue;
                        }
                    };
                    // Queries from other hosts are not our concern here.
                    if msg.message_type() != MessageType::Response {
                        continue;
                    }
                    let events = tracker.lock().absorb(&msg);
                    for event in events {
                        match event {
                            TrackerEvent::Ready(entry) => {
                                metrics::record_discovery("ready");
                                let _ = tx.send(entry);
                                if kind == QueryKind::Lookup {
                                    cancel.cancel();
                                }
                            }
                            TrackerEvent::Withdrawn(entry) => {
                                metrics::record_discovery("withdrawn");
                                let _ = tx.send(entry);
                            }
                        }
                    }
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    debug!("discovery receive error: {}", e);
                }
            }
        }
    }
    trace!("discovery receive loop exited");
}

/// Stream of discovered (and withdrawn) service entries.
///
/// Closes exactly once: when the cancellation token fires, when the stream
/// is dropped, or — for lookups — after the single result. Dropping the
/// stream releases the underlying sockets.
pub struct ServiceStream {
    rx: mpsc::UnboundedReceiver<ServiceEntry>,
    token: CancellationToken,
}

impl ServiceStream {
    /// Receive the next entry; `None` means the stream has closed.
    pub async fn recv(&mut self) -> Option<ServiceEntry> {
        self.rx.recv().await
    }

    /// Stop the discovery session and close the stream.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Stream for ServiceStream {
    type Item = ServiceEntry;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ServiceEntry>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ServiceStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Per-instance discovery state, merged last-wins from responses.
struct InstanceTracker {
    record: ServiceRecord,
    service_name: Name,
    wanted_instance: Option<Name>,
    instances: HashMap<Name, DiscoveredInstance>,
}

struct DiscoveredInstance {
    entry: ServiceEntry,
    hostname: Option<Name>,
    has_srv: bool,
    has_txt: bool,
    emitted: bool,
}

impl DiscoveredInstance {
    fn new(entry: ServiceEntry) -> Self {
        Self {
            entry,
            hostname: None,
            has_srv: false,
            has_txt: false,
            emitted: false,
        }
    }
}

/// State transitions surfaced to the consumer stream.
enum TrackerEvent {
    Ready(ServiceEntry),
    Withdrawn(ServiceEntry),
}

impl InstanceTracker {
    fn new(record: &ServiceRecord, kind: QueryKind) -> Result<Self, MdnsError> {
        let service_name = Name::from_utf8(record.service_name())?;
        let mut tracker = Self {
            record: record.clone(),
            service_name,
            wanted_instance: None,
            instances: HashMap::new(),
        };
        if kind == QueryKind::Lookup {
            // The instance is known up front; SRV/TXT answers may arrive
            // without an accompanying PTR.
            let wanted = Name::from_utf8(record.service_instance_name())?;
            tracker
                .instances
                .insert(wanted.clone(), DiscoveredInstance::new(tracker.seed_entry(&wanted)));
            tracker.wanted_instance = Some(wanted);
        }
        Ok(tracker)
    }

    /// Merge one response message; returns the resulting emissions.
    ///
    /// Records are merged in three passes (PTR, then SRV/TXT, then
    /// addresses) so completion does not depend on section order.
    fn absorb(&mut self, msg: &Message) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        let records: Vec<&Record> = msg.answers().iter().chain(msg.additionals()).collect();

        for rec in &records {
            if let Some(RData::PTR(ptr)) = rec.data() {
                if rec.name() != &self.service_name || !self.wanted(&ptr.0) {
                    continue;
                }
                if rec.ttl() == 0 {
                    self.withdraw(&ptr.0, &mut events);
                    continue;
                }
                let instance = ptr.0.clone();
                if !self.instances.contains_key(&instance) {
                    let entry = self.seed_entry(&instance);
                    self.instances
                        .insert(instance, DiscoveredInstance::new(entry));
                }
            }
        }

        for rec in &records {
            match rec.data() {
                Some(RData::SRV(srv)) => {
                    if !self.wanted(rec.name()) {
                        continue;
                    }
                    if rec.ttl() == 0 {
                        self.withdraw(rec.name(), &mut events);
                        continue;
                    }
                    if let Some(inst) = self.instances.get_mut(rec.name()) {
                        inst.entry.hostname = srv.target().to_utf8();
                        inst.entry.port = srv.port();
                        inst.entry.ttl = rec.ttl();
                        inst.hostname = Some(srv.target().clone());
                        inst.has_srv = true;
                    }
                }
                Some(RData::TXT(txt)) => {
                    if !self.wanted(rec.name()) {
                        continue;
                    }
                    if rec.ttl() == 0 {
                        self.withdraw(rec.name(), &mut events);
                        continue;
                    }
                    if let Some(inst) = self.instances.get_mut(rec.name()) {
                        inst.entry.text = txt
                            .txt_data()
                            .iter()
                            .map(|s| String::from_utf8_lossy(s).into_owned())
                            .collect();
                        inst.has_txt = true;
                    }
                }
                _ => {}
            }
        }

        // Re-announced address sets replace earlier ones; clear each
        // instance's list once per message, then collect.
        let mut cleared_v4 = HashSet::new();
        let mut cleared_v6 = HashSet::new();
        for rec in &records {
            if rec.ttl() == 0 {
                continue;
            }
            match rec.data() {
                Some(RData::A(a)) => {
                    for (key, inst) in self.instances.iter_mut() {
                        if inst.hostname.as_ref() != Some(rec.name()) {
                            continue;
                        }
                        if cleared_v4.insert(key.clone()) {
                            inst.entry.addrs_v4.clear();
                        }
                        inst.entry.addrs_v4.push(a.0);
                    }
                }
                Some(RData::AAAA(aaaa)) => {
                    for (key, inst) in self.instances.iter_mut() {
                        if inst.hostname.as_ref() != Some(rec.name()) {
                            continue;
                        }
                        if cleared_v6.insert(key.clone()) {
                            inst.entry.addrs_v6.clear();
                        }
                        inst.entry.addrs_v6.push(aaaa.0);
                    }
                }
                _ => {}
            }
        }

        for inst in self.instances.values_mut() {
            let has_addr = !inst.entry.addrs_v4.is_empty() || !inst.entry.addrs_v6.is_empty();
            if !inst.emitted && inst.has_srv && inst.has_txt && has_addr {
                inst.emitted = true;
                events.push(TrackerEvent::Ready(inst.entry.clone()));
            }
        }

        events
    }

    /// Whether the session cares about this instance name.
    fn wanted(&self, name: &Name) -> bool {
        match &self.wanted_instance {
            Some(wanted) => name == wanted,
            None => true,
        }
    }

    fn withdraw(&mut self, name: &Name, events: &mut Vec<TrackerEvent>) {
        if let Some(inst) = self.instances.remove(name) {
            if inst.emitted {
                let mut entry = inst.entry;
                entry.ttl = 0;
                events.push(TrackerEvent::Withdrawn(entry));
            }
        }
    }

    /// Fresh entry for a discovered instance name.
    fn seed_entry(&self, instance_name: &Name) -> ServiceEntry {
        let service_labels = self.service_name.num_labels() as usize;
        let instance_labels = (instance_name.num_labels() as usize).saturating_sub(service_labels);
        let label = instance_name
            .iter()
            .take(instance_labels)
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect::<Vec<_>>()
            .join(".");
        let mut entry = ServiceEntry::new(&label, &self.record.service, &self.record.domain);
        entry.text = Vec::new();
        entry
    }
}
