//! Typed payloads carried inside envelopes.
//!
//! Every routable message implements [`Payload`], which gives it a stable
//! declared type name and, when the message has one, access to its request or
//! response header. The router uses the type name to pick a handler; the header
//! accessors let the runtime stamp tracking and correlation ids without knowing
//! the concrete message.

use prost::Message;
use prost_types::Any;

use crate::proto::{
    CacheItem, ComplexMessage, DirectToApp, HeartBeatPulse, LogMessageResponse,
    PluginHealthCheckMultiResponse, PluginHealthCheckRequest, PluginHealthCheckResponse,
    RequestHeader, ResponseHeader, SimpleMessage, StatusCodes, TelemetryMetric,
    TelemetryMetricResponse,
};
use crate::{CoreError, Result};

pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// A message that can travel inside an [`Envelope`](crate::Envelope).
pub trait Payload: Message + Default + Clone + 'static {
    /// Fully qualified name declared in envelopes, e.g. `spacefx.v1.SimpleMessage`.
    const TYPE_NAME: &'static str;

    fn request_header(&self) -> Option<&RequestHeader> {
        None
    }

    /// `Some` when the message has a request header field, set or not.
    fn request_header_slot(&mut self) -> Option<&mut Option<RequestHeader>> {
        None
    }

    fn response_header(&self) -> Option<&ResponseHeader> {
        None
    }

    /// `Some` when the message has a response header field, set or not.
    fn response_header_slot(&mut self) -> Option<&mut Option<ResponseHeader>> {
        None
    }
}

/// Implements [`Payload`] for a prost message.
///
/// ```ignore
/// payload_type!(MyRequest => "acme.v1.MyRequest", request_header);
/// payload_type!(MyReply => "acme.v1.MyReply", response_header);
/// payload_type!(MyBlob => "acme.v1.MyBlob");
/// ```
#[macro_export]
macro_rules! payload_type {
    ($ty:ty => $name:expr) => {
        impl $crate::payload::Payload for $ty {
            const TYPE_NAME: &'static str = $name;
        }
    };
    ($ty:ty => $name:expr, request_header) => {
        impl $crate::payload::Payload for $ty {
            const TYPE_NAME: &'static str = $name;

            fn request_header(&self) -> Option<&$crate::proto::RequestHeader> {
                self.request_header.as_ref()
            }

            fn request_header_slot(
                &mut self,
            ) -> Option<&mut Option<$crate::proto::RequestHeader>> {
                Some(&mut self.request_header)
            }
        }
    };
    ($ty:ty => $name:expr, response_header) => {
        impl $crate::payload::Payload for $ty {
            const TYPE_NAME: &'static str = $name;

            fn response_header(&self) -> Option<&$crate::proto::ResponseHeader> {
                self.response_header.as_ref()
            }

            fn response_header_slot(
                &mut self,
            ) -> Option<&mut Option<$crate::proto::ResponseHeader>> {
                Some(&mut self.response_header)
            }
        }
    };
}

payload_type!(DirectToApp => "spacefx.v1.DirectToApp", response_header);
payload_type!(HeartBeatPulse => "spacefx.v1.HeartBeatPulse", response_header);
payload_type!(PluginHealthCheckRequest => "spacefx.v1.PluginHealthCheckRequest", request_header);
payload_type!(PluginHealthCheckResponse => "spacefx.v1.PluginHealthCheckResponse", response_header);
payload_type!(PluginHealthCheckMultiResponse => "spacefx.v1.PluginHealthCheckMultiResponse", response_header);
payload_type!(TelemetryMetric => "spacefx.v1.TelemetryMetric", request_header);
payload_type!(TelemetryMetricResponse => "spacefx.v1.TelemetryMetricResponse", response_header);
payload_type!(LogMessageResponse => "spacefx.v1.LogMessageResponse", response_header);
payload_type!(CacheItem => "spacefx.v1.CacheItem", request_header);
payload_type!(SimpleMessage => "spacefx.v1.SimpleMessage", request_header);
payload_type!(ComplexMessage => "spacefx.v1.ComplexMessage", response_header);

pub fn new_tracking_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Strips the `type.googleapis.com/` style prefix from a type url.
pub fn type_name_from_url(type_url: &str) -> &str {
    type_url.rsplit('/').next().unwrap_or(type_url)
}

pub fn pack<T: Payload>(message: &T) -> Any {
    Any {
        type_url: format!("{TYPE_URL_PREFIX}{}", T::TYPE_NAME),
        value: message.encode_to_vec(),
    }
}

pub fn unpack<T: Payload>(any: &Any) -> Result<T> {
    let declared = type_name_from_url(&any.type_url);
    if declared != T::TYPE_NAME {
        return Err(CoreError::UnknownPayloadType(format!(
            "expected {}, found {}",
            T::TYPE_NAME,
            declared
        )));
    }
    Ok(T::decode(any.value.as_slice())?)
}

/// Stamps the header of an inbound message.
///
/// The immediate sender becomes `app_id`; `origin_app_id` is only set the first
/// time; an empty tracking id is generated and an empty correlation id takes
/// the tracking id.
pub fn populate_headers<T: Payload>(message: &mut T, source_app_id: &str) {
    if let Some(slot) = message.request_header_slot() {
        let header = slot.get_or_insert_with(RequestHeader::default);
        header.app_id = source_app_id.to_string();
        if header.origin_app_id.is_empty() {
            header.origin_app_id = source_app_id.to_string();
        }
        if header.tracking_id.is_empty() {
            header.tracking_id = new_tracking_id();
        }
        if header.correlation_id.is_empty() {
            header.correlation_id = header.tracking_id.clone();
        }
    }

    if let Some(slot) = message.response_header_slot() {
        let header = slot.get_or_insert_with(ResponseHeader::default);
        header.app_id = source_app_id.to_string();
        if header.origin_app_id.is_empty() {
            header.origin_app_id = source_app_id.to_string();
        }
        if header.tracking_id.is_empty() {
            header.tracking_id = new_tracking_id();
        }
        if header.correlation_id.is_empty() {
            header.correlation_id = header.tracking_id.clone();
        }
    }
}

/// Seeds a response's header from the request it answers.
///
/// Responses without a response header field are returned untouched.
pub fn response_from_request<Req: Payload, Resp: Payload>(request: &Req, mut response: Resp) -> Resp {
    let (tracking_id, correlation_id) = match request.request_header() {
        Some(header) => {
            let tracking_id = if header.tracking_id.is_empty() {
                new_tracking_id()
            } else {
                header.tracking_id.clone()
            };
            let correlation_id = if header.correlation_id.is_empty() {
                tracking_id.clone()
            } else {
                header.correlation_id.clone()
            };
            (tracking_id, correlation_id)
        }
        None => {
            let id = new_tracking_id();
            (id.clone(), id)
        }
    };

    if let Some(slot) = response.response_header_slot() {
        let header = slot.get_or_insert_with(ResponseHeader::default);
        header.tracking_id = tracking_id;
        header.correlation_id = correlation_id;
        header.set_status(StatusCodes::Unknown);
    }
    response
}
