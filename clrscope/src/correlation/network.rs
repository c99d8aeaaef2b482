//! HTTP request timelines
//!
//! A request's activity path names the request; every sub-operation (name
//! resolution, socket connect, TLS handshake, header and content transfer)
//! runs under a child path. Entries are keyed by the request's own key and
//! detail events find their entry through their parent key.
//!
//! ```text
//! 1/4        RequestStart ─────────────────────────────────────── RequestStop
//! 1/4/1        DnsStart ── DnsStop
//! 1/4/2                      ConnectStart ── ConnectStop
//! 1/4/3                                        HandshakeStart ── HandshakeStop
//! 1/4/4                                                            RequestHeadersStart ...
//! ```
//!
//! Each phase reports its duration and the wait since the previous completed
//! phase ended (or since the request started). After a redirect status, later
//! phases are attributed to the redirect sub-record. A redirected request that
//! starts under the original request's path joins that entry through an alias.

use clrscope_common::{activity_key, parent_key, ActivityId};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;

use super::CorrelationStats;
use crate::domain::{Duration, Pid, Timestamp};
use crate::payload::tls_protocol_name;
use crate::trace_data::{EventHeader, NetworkEvent};

const REDIRECT_STATUS: std::ops::RangeInclusive<i32> = 300..=308;

/// One completed phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub start: Timestamp,
    /// Gap since the previous phase ended, or since the request started
    pub wait: Duration,
    pub duration: Duration,
}

impl PhaseTiming {
    #[must_use]
    pub fn end(&self) -> Timestamp {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Dns,
    Socket,
    Tls,
    RequestResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct OpenPhases {
    dns: Option<Timestamp>,
    socket: Option<Timestamp>,
    tls: Option<Timestamp>,
    request_response: Option<Timestamp>,
}

impl OpenPhases {
    fn slot(&mut self, phase: Phase) -> &mut Option<Timestamp> {
        match phase {
            Phase::Dns => &mut self.dns,
            Phase::Socket => &mut self.socket,
            Phase::Tls => &mut self.tls,
            Phase::RequestResponse => &mut self.request_response,
        }
    }
}

/// Phase timings of one request (or of its redirect)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestPhases {
    pub dns: Option<PhaseTiming>,
    pub socket: Option<PhaseTiming>,
    pub tls: Option<PhaseTiming>,
    /// From `RequestHeadersStart` to `ResponseContentStop`
    pub request_response: Option<PhaseTiming>,
    /// Time spent waiting for a connection, as reported by the runtime
    pub queueing: Option<Duration>,
    #[serde(skip)]
    open: OpenPhases,
}

impl RequestPhases {
    fn slot(&mut self, phase: Phase) -> &mut Option<PhaseTiming> {
        match phase {
            Phase::Dns => &mut self.dns,
            Phase::Socket => &mut self.socket,
            Phase::Tls => &mut self.tls,
            Phase::RequestResponse => &mut self.request_response,
        }
    }

    /// End of the latest completed phase preceding `phase`
    fn wait_base(&self, phase: Phase, request_start: Timestamp) -> Timestamp {
        let earlier = match phase {
            Phase::Dns => [None, None, None],
            Phase::Socket => [self.dns, None, None],
            Phase::Tls => [self.socket, self.dns, None],
            Phase::RequestResponse => [self.tls, self.socket, self.dns],
        };
        earlier.into_iter().flatten().next().map_or(request_start, |timing| timing.end())
    }

    fn begin(&mut self, phase: Phase, now: Timestamp) {
        *self.open.slot(phase) = Some(now);
    }

    /// Returns false when the phase was never started
    fn end(&mut self, phase: Phase, now: Timestamp, request_start: Timestamp) -> bool {
        let Some(start) = self.open.slot(phase).take() else {
            return false;
        };
        let wait = start.saturating_duration_since(self.wait_base(phase, request_start));
        let duration = now.saturating_duration_since(start);
        *self.slot(phase) = Some(PhaseTiming { start, wait, duration });
        true
    }
}

/// How a request (or its redirect) ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Completed { status_code: i32 },
    Failed { message: String },
}

/// The redirected leg of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectTiming {
    pub start: Timestamp,
    /// Empty when the runtime does not report the redirect target
    pub url: String,
    pub phases: RequestPhases,
    /// Set when the redirected request reported its own stop
    pub outcome: Option<RequestOutcome>,
    pub end: Option<Timestamp>,
}

impl RedirectTiming {
    fn new(start: Timestamp) -> Self {
        Self {
            start,
            url: String::new(),
            phases: RequestPhases::default(),
            outcome: None,
            end: None,
        }
    }
}

/// A completed HTTP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestTimeline {
    pub process_id: Pid,
    /// Activity path of the request
    pub activity: String,
    pub url: String,
    pub start: Timestamp,
    pub duration: Duration,
    #[serde(flatten)]
    pub outcome: RequestOutcome,
    pub http_version: Option<String>,
    pub connection_id: Option<i64>,
    pub phases: RequestPhases,
    pub tls_protocol: Option<String>,
    pub handshake_error: Option<String>,
    /// Last response status seen in headers, redirects included
    pub response_status: Option<i32>,
    pub redirect: Option<RedirectTiming>,
}

impl RequestTimeline {
    #[must_use]
    pub fn end(&self) -> Timestamp {
        self.start + self.duration
    }

    #[must_use]
    pub fn status_code(&self) -> Option<i32> {
        match self.outcome {
            RequestOutcome::Completed { status_code } => Some(status_code),
            RequestOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug)]
struct OpenRequest {
    url: String,
    start: Timestamp,
    http_version: Option<String>,
    connection_id: Option<i64>,
    phases: RequestPhases,
    tls_protocol: Option<String>,
    handshake_error: Option<String>,
    response_status: Option<i32>,
    redirect: Option<RedirectTiming>,
}

impl OpenRequest {
    /// Phases currently being filled and the start their waits are measured from
    fn active(&mut self) -> (&mut RequestPhases, Timestamp) {
        match &mut self.redirect {
            Some(redirect) => (&mut redirect.phases, redirect.start),
            None => (&mut self.phases, self.start),
        }
    }

    fn into_timeline(
        self,
        process_id: Pid,
        activity: String,
        end: Timestamp,
        outcome: RequestOutcome,
    ) -> RequestTimeline {
        RequestTimeline {
            process_id,
            activity,
            url: self.url,
            start: self.start,
            duration: end.saturating_duration_since(self.start),
            outcome,
            http_version: self.http_version,
            connection_id: self.connection_id,
            phases: self.phases,
            tls_protocol: self.tls_protocol,
            handshake_error: self.handshake_error,
            response_status: self.response_status,
            redirect: self.redirect,
        }
    }
}

/// `scheme://host[:port]path`, empty when the scheme is unknown
#[must_use]
pub fn build_url(scheme: &str, host: &str, port: u32, path: &str) -> String {
    if scheme.is_empty() {
        String::new()
    } else if port == 0 {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}:{port}{path}")
    }
}

fn http_version(major: u8, minor: u8) -> Option<String> {
    (major != 0).then(|| format!("{major}.{minor}"))
}

#[derive(Debug, Default)]
pub struct NetworkCorrelator {
    requests: HashMap<String, OpenRequest>,
    /// Redirected request key -> key of the entry it belongs to
    aliases: HashMap<String, String>,
    stats: CorrelationStats,
}

impl NetworkCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network event; returns the timeline it closed, if any
    pub fn on_event(
        &mut self,
        header: &EventHeader,
        event: &NetworkEvent,
    ) -> Option<RequestTimeline> {
        match event {
            NetworkEvent::RequestStart {
                scheme,
                host,
                port,
                path,
                version_major,
                version_minor,
            } => {
                let url = build_url(scheme, host, *port, path);
                self.on_request_start(header, url, http_version(*version_major, *version_minor));
                None
            }
            NetworkEvent::RequestStop { status_code } => {
                self.on_request_end(header, RequestOutcome::Completed { status_code: *status_code })
            }
            NetworkEvent::RequestFailed { message }
            | NetworkEvent::RequestFailedDetailed { message } => {
                self.on_request_end(header, RequestOutcome::Failed { message: message.clone() })
            }
            detail => {
                self.on_detail(header, detail);
                None
            }
        }
    }

    /// Count a network payload that could not be decoded
    pub fn record_undecodable(&mut self) {
        self.stats.undecodable_payloads += 1;
    }

    /// Requests started but not yet closed
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }

    fn on_request_start(&mut self, header: &EventHeader, url: String, version: Option<String>) {
        let key = activity_key(&header.activity_id);
        if self.requests.contains_key(&key) || self.aliases.contains_key(&key) {
            self.stats.duplicate_starts += 1;
            debug!("request {key} started twice");
            return;
        }

        if let Some(parent) = parent_key(&header.activity_id) {
            let redirect =
                self.requests.get_mut(&parent).and_then(|entry| entry.redirect.as_mut());
            if let Some(redirect) = redirect {
                redirect.start = header.timestamp;
                if !url.is_empty() {
                    redirect.url = url;
                }
                self.aliases.insert(key, parent);
                return;
            }
        }

        self.requests.insert(
            key,
            OpenRequest {
                url,
                start: header.timestamp,
                http_version: version,
                connection_id: None,
                phases: RequestPhases::default(),
                tls_protocol: None,
                handshake_error: None,
                response_status: None,
                redirect: None,
            },
        );
    }

    fn on_request_end(
        &mut self,
        header: &EventHeader,
        outcome: RequestOutcome,
    ) -> Option<RequestTimeline> {
        let key = activity_key(&header.activity_id);
        if let Some(entry) = self.requests.remove(&key) {
            self.aliases.retain(|_, root| *root != key);
            return Some(entry.into_timeline(header.process_id, key, header.timestamp, outcome));
        }

        if let Some(root) = self.aliases.remove(&key) {
            let redirect = self.requests.get_mut(&root).and_then(|entry| entry.redirect.as_mut());
            if let Some(redirect) = redirect {
                redirect.outcome = Some(outcome);
                redirect.end = Some(header.timestamp);
            }
            return None;
        }

        self.stats.orphan_stops += 1;
        debug!("request {key} ended without a matching start");
        None
    }

    /// Entry key for a detail event: its own key, then its parent's
    fn resolve(&self, id: &ActivityId) -> Option<String> {
        std::iter::once(activity_key(id)).chain(parent_key(id)).find_map(|key| {
            if self.requests.contains_key(&key) {
                Some(key)
            } else {
                self.aliases.get(&key).cloned()
            }
        })
    }

    fn on_detail(&mut self, header: &EventHeader, event: &NetworkEvent) {
        let entry = self.resolve(&header.activity_id).and_then(|key| self.requests.get_mut(&key));
        let Some(entry) = entry else {
            self.stats.orphan_details += 1;
            debug!("{event:?} for unknown request {}", activity_key(&header.activity_id));
            return;
        };

        let now = header.timestamp;
        let completed = match event {
            NetworkEvent::DnsStart { .. } => begin(entry, Phase::Dns, now),
            NetworkEvent::DnsStop | NetworkEvent::DnsFailed => end(entry, Phase::Dns, now),
            NetworkEvent::ConnectStart { .. } | NetworkEvent::AcceptStart { .. } => {
                begin(entry, Phase::Socket, now)
            }
            NetworkEvent::ConnectStop
            | NetworkEvent::ConnectFailed { .. }
            | NetworkEvent::AcceptStop
            | NetworkEvent::AcceptFailed { .. } => end(entry, Phase::Socket, now),
            NetworkEvent::HandshakeStart { .. } => begin(entry, Phase::Tls, now),
            NetworkEvent::HandshakeStop { protocol } => {
                entry.tls_protocol = Some(tls_protocol_name(*protocol));
                end(entry, Phase::Tls, now)
            }
            NetworkEvent::HandshakeFailed { message, .. } => {
                entry.handshake_error = Some(message.clone());
                end(entry, Phase::Tls, now)
            }
            NetworkEvent::RequestHeadersStart { connection_id } => {
                if connection_id.is_some() {
                    entry.connection_id = *connection_id;
                }
                begin(entry, Phase::RequestResponse, now)
            }
            NetworkEvent::ResponseContentStop => end(entry, Phase::RequestResponse, now),
            NetworkEvent::ResponseHeadersStop { status_code } => {
                entry.response_status = Some(*status_code);
                if REDIRECT_STATUS.contains(status_code) {
                    entry.redirect = Some(RedirectTiming::new(now));
                }
                true
            }
            NetworkEvent::Redirect { redirect_url } => {
                let redirect = entry.redirect.get_or_insert_with(|| RedirectTiming::new(now));
                redirect.url.clone_from(redirect_url);
                true
            }
            NetworkEvent::RequestLeftQueue { time_on_queue_ms, .. } => {
                entry.active().0.queueing = Some(Duration::from_millis_f64(*time_on_queue_ms));
                true
            }
            NetworkEvent::ConnectionEstablished {
                version_major,
                version_minor,
                connection_id,
                ..
            } => {
                if connection_id.is_some() {
                    entry.connection_id = *connection_id;
                }
                if let Some(version) = http_version(*version_major, *version_minor) {
                    entry.http_version = Some(version);
                }
                true
            }
            _ => true,
        };

        if !completed {
            self.stats.orphan_details += 1;
            debug!("{event:?} without a matching phase start");
        }
    }
}

fn begin(entry: &mut OpenRequest, phase: Phase, now: Timestamp) -> bool {
    entry.active().0.begin(phase, now);
    true
}

fn end(entry: &mut OpenRequest, phase: Phase, now: Timestamp) -> bool {
    let (phases, start) = entry.active();
    phases.end(phase, now, start)
}
