//! # Shared Wire-Level Definitions
//!
//! Definitions shared between trace producers and the `clrscope` correlation
//! engine. Nothing in here allocates beyond `alloc`, so the crate can be linked
//! into producers that cannot depend on `std`.
//!
//! ## Key Items
//!
//! - [`ActivityId`] / [`ActivityPath`] - the 128-bit hierarchical activity identifier
//!   and its codec ([`encode`], [`decode`], [`is_path_shaped`])
//! - [`NetProvider`] plus the `HTTP_*`, `DNS_*`, `SOCKETS_*`, `SECURITY_*` event ids
//! - GC and contention flag constants sampled by the reconstructors

#![no_std]

extern crate alloc;

pub mod activity;

pub use activity::{
    activity_key, decode, encode, encode_with_process_id, is_path_shaped, parent_key, ActivityId,
    ActivityPath, ParseActivityIdError, Segment,
};

// ============================================================================
// Network Providers
// ============================================================================

/// Runtime event source emitting one network sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "user", serde(rename_all = "snake_case"))]
pub enum NetProvider {
    Http,
    Dns,
    Sockets,
    Security,
}

impl NetProvider {
    /// Event source name as registered by the runtime
    #[must_use]
    pub const fn source_name(self) -> &'static str {
        match self {
            NetProvider::Http => "System.Net.Http",
            NetProvider::Dns => "System.Net.NameResolution",
            NetProvider::Sockets => "System.Net.Sockets",
            NetProvider::Security => "System.Net.Security",
        }
    }

    /// Map an event source name back to the provider
    #[must_use]
    pub fn from_source_name(name: &str) -> Option<Self> {
        match name {
            "System.Net.Http" => Some(NetProvider::Http),
            "System.Net.NameResolution" => Some(NetProvider::Dns),
            "System.Net.Sockets" => Some(NetProvider::Sockets),
            "System.Net.Security" => Some(NetProvider::Security),
            _ => None,
        }
    }
}

// ============================================================================
// Event Ids: System.Net.Http
// ============================================================================

pub const HTTP_REQUEST_START: u16 = 1;
pub const HTTP_REQUEST_STOP: u16 = 2;
pub const HTTP_REQUEST_FAILED: u16 = 3;
pub const HTTP_CONNECTION_ESTABLISHED: u16 = 4;
pub const HTTP_CONNECTION_CLOSED: u16 = 5;
pub const HTTP_REQUEST_LEFT_QUEUE: u16 = 6;
pub const HTTP_REQUEST_HEADERS_START: u16 = 7;
pub const HTTP_REQUEST_HEADERS_STOP: u16 = 8;
pub const HTTP_REQUEST_CONTENT_START: u16 = 9;
pub const HTTP_REQUEST_CONTENT_STOP: u16 = 10;
pub const HTTP_RESPONSE_HEADERS_START: u16 = 11;
pub const HTTP_RESPONSE_HEADERS_STOP: u16 = 12;
pub const HTTP_RESPONSE_CONTENT_START: u16 = 13;
pub const HTTP_RESPONSE_CONTENT_STOP: u16 = 14;
/// Emitted right after [`HTTP_REQUEST_FAILED`] with the full exception text
pub const HTTP_REQUEST_FAILED_DETAILED: u16 = 15;
pub const HTTP_REDIRECT: u16 = 16;

// ============================================================================
// Event Ids: System.Net.NameResolution / Sockets / Security
// ============================================================================

pub const DNS_RESOLUTION_START: u16 = 1;
pub const DNS_RESOLUTION_STOP: u16 = 2;
pub const DNS_RESOLUTION_FAILED: u16 = 3;

pub const SOCKETS_CONNECT_START: u16 = 1;
pub const SOCKETS_CONNECT_STOP: u16 = 2;
pub const SOCKETS_CONNECT_FAILED: u16 = 3;
pub const SOCKETS_ACCEPT_START: u16 = 4;
pub const SOCKETS_ACCEPT_STOP: u16 = 5;
pub const SOCKETS_ACCEPT_FAILED: u16 = 6;

pub const SECURITY_HANDSHAKE_START: u16 = 1;
pub const SECURITY_HANDSHAKE_STOP: u16 = 2;
pub const SECURITY_HANDSHAKE_FAILED: u16 = 3;

// ============================================================================
// TLS Protocol Flags (HandshakeStop payload)
// ============================================================================

pub const SSL_PROTOCOL_NONE: u32 = 0;
pub const SSL_PROTOCOL_SSL2: u32 = 12;
pub const SSL_PROTOCOL_SSL3: u32 = 48;
pub const SSL_PROTOCOL_TLS10: u32 = 192;
pub const SSL_PROTOCOL_DEFAULT: u32 = 240;
pub const SSL_PROTOCOL_TLS11: u32 = 768;
pub const SSL_PROTOCOL_TLS12: u32 = 3072;
pub const SSL_PROTOCOL_TLS13: u32 = 12288;

// ============================================================================
// GC / Contention Flags
// ============================================================================

/// `GlobalHeapHistory.GlobalMechanisms` bit set when the collection compacts
pub const GC_GLOBAL_MECHANISM_COMPACTION: u32 = 0x2;

/// Generation index for the large object heap in per-generation arrays
pub const GC_LOH_INDEX: usize = 3;

/// Monitor contention flag: the lock was taken by managed code
pub const CONTENTION_FLAGS_MANAGED: u8 = 0;
/// Monitor contention flag: the lock was taken by native runtime code
pub const CONTENTION_FLAGS_NATIVE: u8 = 1;
