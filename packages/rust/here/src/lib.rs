//! HERE service contracts: waypoint sequencing and truck routing.
//!
//! Request builders and response parsers are pure functions so they can be
//! tested without a network; [`HereClient`] performs the actual GET calls.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

mod client;
pub mod routing;
pub mod sequencing;

pub use client::HereClient;
pub use routing::{RouteRequest, URL_LENGTH_WARN, build_route_request, parse_route_response};
pub use sequencing::{
    SequenceOptions, SequenceRequest, ViaStop, build_sequence_request, normalize_departure,
    parse_sequence_response,
};

/// Bytes escaped by `encodeURIComponent`: everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a URI component.
pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT).to_string()
}
