//! Binary payload grammar of the runtime's network event sources
//!
//! Mandatory fields missing from a truncated buffer decode to zero or empty;
//! fields that older runtimes never wrote decode to `None`.

use clrscope_common::{
    NetProvider, DNS_RESOLUTION_FAILED, DNS_RESOLUTION_START, DNS_RESOLUTION_STOP,
    HTTP_CONNECTION_CLOSED, HTTP_CONNECTION_ESTABLISHED, HTTP_REDIRECT, HTTP_REQUEST_CONTENT_START,
    HTTP_REQUEST_CONTENT_STOP, HTTP_REQUEST_FAILED, HTTP_REQUEST_FAILED_DETAILED,
    HTTP_REQUEST_HEADERS_START, HTTP_REQUEST_HEADERS_STOP, HTTP_REQUEST_LEFT_QUEUE,
    HTTP_REQUEST_START, HTTP_REQUEST_STOP, HTTP_RESPONSE_CONTENT_START,
    HTTP_RESPONSE_CONTENT_STOP, HTTP_RESPONSE_HEADERS_START, HTTP_RESPONSE_HEADERS_STOP,
    SECURITY_HANDSHAKE_FAILED, SECURITY_HANDSHAKE_START, SECURITY_HANDSHAKE_STOP,
    SOCKETS_ACCEPT_FAILED, SOCKETS_ACCEPT_START, SOCKETS_ACCEPT_STOP, SOCKETS_CONNECT_FAILED,
    SOCKETS_CONNECT_START, SOCKETS_CONNECT_STOP, SSL_PROTOCOL_DEFAULT, SSL_PROTOCOL_NONE,
    SSL_PROTOCOL_SSL2, SSL_PROTOCOL_SSL3, SSL_PROTOCOL_TLS10, SSL_PROTOCOL_TLS11,
    SSL_PROTOCOL_TLS12, SSL_PROTOCOL_TLS13,
};

use super::PayloadReader;
use crate::trace_data::NetworkEvent;

/// Decode one network event. Returns `None` for event ids this grammar does not know.
#[must_use]
pub fn decode_network_event(
    provider: NetProvider,
    event_id: u16,
    data: &[u8],
) -> Option<NetworkEvent> {
    let mut r = PayloadReader::new(data);
    match provider {
        NetProvider::Http => decode_http(event_id, &mut r),
        NetProvider::Dns => decode_dns(event_id, &mut r),
        NetProvider::Sockets => decode_sockets(event_id, &mut r),
        NetProvider::Security => decode_security(event_id, &mut r),
    }
}

fn string(r: &mut PayloadReader<'_>) -> String {
    r.read_utf16_string().unwrap_or_default()
}

fn decode_http(event_id: u16, r: &mut PayloadReader<'_>) -> Option<NetworkEvent> {
    let event = match event_id {
        HTTP_REQUEST_START => NetworkEvent::RequestStart {
            scheme: string(r),
            host: string(r),
            port: r.read_u32().unwrap_or_default(),
            path: string(r),
            version_major: r.read_u8().unwrap_or_default(),
            version_minor: r.read_u8().unwrap_or_default(),
        },
        HTTP_REQUEST_STOP => {
            NetworkEvent::RequestStop { status_code: r.read_i32().unwrap_or_default() }
        }
        HTTP_REQUEST_FAILED => NetworkEvent::RequestFailed { message: string(r) },
        HTTP_REQUEST_FAILED_DETAILED => NetworkEvent::RequestFailedDetailed { message: string(r) },
        HTTP_CONNECTION_ESTABLISHED => NetworkEvent::ConnectionEstablished {
            version_major: r.read_u8().unwrap_or_default(),
            version_minor: r.read_u8().unwrap_or_default(),
            connection_id: r.read_i64(),
            scheme: string(r),
            host: string(r),
            port: r.read_u32().unwrap_or_default(),
            remote_address: string(r),
        },
        HTTP_CONNECTION_CLOSED => NetworkEvent::ConnectionClosed {
            version_major: r.read_u8().unwrap_or_default(),
            version_minor: r.read_u8().unwrap_or_default(),
            connection_id: r.read_i64(),
        },
        HTTP_REQUEST_LEFT_QUEUE => NetworkEvent::RequestLeftQueue {
            time_on_queue_ms: r.read_f64().unwrap_or_default(),
            version_major: r.read_u8().unwrap_or_default(),
            version_minor: r.read_u8().unwrap_or_default(),
        },
        HTTP_REQUEST_HEADERS_START => {
            NetworkEvent::RequestHeadersStart { connection_id: r.read_i64() }
        }
        HTTP_REQUEST_HEADERS_STOP => NetworkEvent::RequestHeadersStop,
        HTTP_REQUEST_CONTENT_START => NetworkEvent::RequestContentStart,
        HTTP_REQUEST_CONTENT_STOP => {
            NetworkEvent::RequestContentStop { content_length: r.read_i64().unwrap_or_default() }
        }
        HTTP_RESPONSE_HEADERS_START => NetworkEvent::ResponseHeadersStart,
        HTTP_RESPONSE_HEADERS_STOP => {
            NetworkEvent::ResponseHeadersStop { status_code: r.read_i32().unwrap_or_default() }
        }
        HTTP_RESPONSE_CONTENT_START => NetworkEvent::ResponseContentStart,
        HTTP_RESPONSE_CONTENT_STOP => NetworkEvent::ResponseContentStop,
        HTTP_REDIRECT => NetworkEvent::Redirect { redirect_url: string(r) },
        _ => return None,
    };
    Some(event)
}

fn decode_dns(event_id: u16, r: &mut PayloadReader<'_>) -> Option<NetworkEvent> {
    match event_id {
        DNS_RESOLUTION_START => Some(NetworkEvent::DnsStart { host: string(r) }),
        DNS_RESOLUTION_STOP => Some(NetworkEvent::DnsStop),
        DNS_RESOLUTION_FAILED => Some(NetworkEvent::DnsFailed),
        _ => None,
    }
}

fn decode_sockets(event_id: u16, r: &mut PayloadReader<'_>) -> Option<NetworkEvent> {
    match event_id {
        SOCKETS_CONNECT_START => Some(NetworkEvent::ConnectStart { address: string(r) }),
        SOCKETS_CONNECT_STOP => Some(NetworkEvent::ConnectStop),
        SOCKETS_CONNECT_FAILED => Some(NetworkEvent::ConnectFailed { message: string(r) }),
        SOCKETS_ACCEPT_START => Some(NetworkEvent::AcceptStart { address: string(r) }),
        SOCKETS_ACCEPT_STOP => Some(NetworkEvent::AcceptStop),
        SOCKETS_ACCEPT_FAILED => Some(NetworkEvent::AcceptFailed { message: string(r) }),
        _ => None,
    }
}

fn decode_security(event_id: u16, r: &mut PayloadReader<'_>) -> Option<NetworkEvent> {
    match event_id {
        SECURITY_HANDSHAKE_START => Some(NetworkEvent::HandshakeStart {
            is_server: r.read_bool().unwrap_or_default(),
            target_host: string(r),
        }),
        SECURITY_HANDSHAKE_STOP => {
            Some(NetworkEvent::HandshakeStop { protocol: r.read_u32().unwrap_or_default() })
        }
        SECURITY_HANDSHAKE_FAILED => Some(NetworkEvent::HandshakeFailed {
            is_server: r.read_bool().unwrap_or_default(),
            elapsed_ms: r.read_f64().unwrap_or_default(),
            message: string(r),
        }),
        _ => None,
    }
}

/// Display name of a negotiated TLS protocol value
#[must_use]
pub fn tls_protocol_name(protocol: u32) -> String {
    match protocol {
        SSL_PROTOCOL_NONE => "None".to_string(),
        SSL_PROTOCOL_SSL2 => "SSL 2.0".to_string(),
        SSL_PROTOCOL_SSL3 => "SSL 3.0".to_string(),
        SSL_PROTOCOL_TLS10 => "TLS 1.0".to_string(),
        SSL_PROTOCOL_DEFAULT => "Default".to_string(),
        SSL_PROTOCOL_TLS11 => "TLS 1.1".to_string(),
        SSL_PROTOCOL_TLS12 => "TLS 1.2".to_string(),
        SSL_PROTOCOL_TLS13 => "TLS 1.3".to_string(),
        other => other.to_string(),
    }
}
