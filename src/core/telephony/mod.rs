//! Telephony media stream leg.
//!
//! Inbound frames become [`DownstreamEvent`]s; outbound audio goes through a
//! [`MediaSink`].

mod messages;
mod session;

pub use messages::{
    DownstreamEvent, InboundFrame, MediaPayload, OutboundFrame, OutboundMedia, RoutingAttributes,
    StartPayload, TelephonyError, parse_frame,
};
pub use session::{CloseStatus, MediaSink, TelephonySession, TelephonySink};
