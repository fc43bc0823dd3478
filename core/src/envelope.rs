use prost::Message;
use prost_types::Any;

use crate::payload::{self, Payload};
use crate::proto::{DirectToApp, ResponseHeader, StatusCodes};
use crate::{CoreError, Result};

/// Topic every application publishes its heartbeat pulse on.
pub const HEARTBEAT_PULSE_TOPIC: &str = "HeartbeatPulse";

/// Prefix of per-application direct message topics.
pub const DIRECT_TO_APP_PREFIX: &str = "DirectToApp-";

/// Topics every client subscribes to in addition to its own direct topic.
pub const CORE_TOPICS: &[&str] = &[HEARTBEAT_PULSE_TOPIC];

/// Builds the direct message topic of an application.
///
/// Topic names are case-folded to upper case so that application ids compare
/// case-insensitively on the bus.
///
/// # Examples
///
/// ```
/// use spacefx_core::envelope::direct_to_app_topic;
///
/// assert_eq!(direct_to_app_topic("app-a"), "DIRECTTOAPP-APP-A");
/// ```
pub fn direct_to_app_topic(app_id: &str) -> String {
    format!("{DIRECT_TO_APP_PREFIX}{app_id}").to_uppercase()
}

/// Decoded view of a direct-to-app message.
///
/// On the wire an envelope is a [`DirectToApp`] protobuf: a response header
/// carrying tracking and correlation ids, the id of the sending application,
/// the declared payload type name and the payload itself packed as an `Any`.
///
/// # Fields
///
/// * `tracking_id` - Identifies this message across hops
/// * `correlation_id` - Links the message to the request that caused it
/// * `status` - Status carried over from the payload's response header
/// * `source_app_id` - Application that published the message
/// * `message_type` - Declared type name used to select a handler
/// * `message` - Packed payload
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub tracking_id: String,
    pub correlation_id: String,
    pub status: StatusCodes,
    pub source_app_id: String,
    pub message_type: String,
    pub message: Any,
}

impl Envelope {
    /// Wraps a payload for sending.
    ///
    /// Tracking and correlation ids start out random. When the payload has a
    /// request header its ids are used instead; a response header's ids and
    /// status take precedence over both.
    ///
    /// # Examples
    ///
    /// ```
    /// use spacefx_core::envelope::Envelope;
    /// use spacefx_core::proto::{RequestHeader, SimpleMessage};
    ///
    /// let msg = SimpleMessage {
    ///     request_header: Some(RequestHeader {
    ///         tracking_id: "t-1".into(),
    ///         ..Default::default()
    ///     }),
    ///     message: "ping".into(),
    /// };
    /// let env = Envelope::wrap(&msg);
    /// assert_eq!(env.tracking_id, "t-1");
    /// assert_eq!(env.correlation_id, "t-1");
    /// assert_eq!(env.message_type, "spacefx.v1.SimpleMessage");
    /// ```
    pub fn wrap<T: Payload>(message: &T) -> Self {
        let mut tracking_id = payload::new_tracking_id();
        let mut correlation_id = payload::new_tracking_id();
        let mut status = StatusCodes::Unknown;

        if let Some(header) = message.request_header() {
            if !header.tracking_id.is_empty() {
                tracking_id = header.tracking_id.clone();
                correlation_id = non_empty_or(&header.correlation_id, &tracking_id);
            }
        }

        if let Some(header) = message.response_header() {
            if !header.tracking_id.is_empty() {
                tracking_id = header.tracking_id.clone();
                correlation_id = non_empty_or(&header.correlation_id, &tracking_id);
            }
            status = header.status();
        }

        Self {
            tracking_id,
            correlation_id,
            status,
            source_app_id: String::new(),
            message_type: T::TYPE_NAME.to_string(),
            message: payload::pack(message),
        }
    }

    /// Decodes an envelope received on a direct topic.
    ///
    /// `source_app_id` is the sender reported by the transport; when non-empty
    /// it replaces whatever the sender wrote into the envelope.
    pub fn decode(bytes: &[u8], source_app_id: &str) -> Result<Self> {
        let wire = DirectToApp::decode(bytes)
            .map_err(|e| CoreError::MalformedEnvelope(e.to_string()))?;

        if wire.message_type.is_empty() {
            return Err(CoreError::MalformedEnvelope(
                "envelope has no message type".into(),
            ));
        }
        let message = wire.message.ok_or_else(|| {
            CoreError::MalformedEnvelope(format!("{} envelope has no payload", wire.message_type))
        })?;

        let header = wire.response_header.unwrap_or_default();
        let source_app_id = if source_app_id.is_empty() {
            wire.source_app_id
        } else {
            source_app_id.to_string()
        };

        Ok(Self {
            status: header.status(),
            correlation_id: non_empty_or(&header.correlation_id, &header.tracking_id),
            tracking_id: header.tracking_id,
            source_app_id,
            message_type: wire.message_type,
            message,
        })
    }

    pub fn to_wire(&self) -> DirectToApp {
        let mut header = ResponseHeader {
            tracking_id: self.tracking_id.clone(),
            correlation_id: self.correlation_id.clone(),
            ..Default::default()
        };
        header.set_status(self.status);

        DirectToApp {
            response_header: Some(header),
            source_app_id: self.source_app_id.clone(),
            message_type: self.message_type.clone(),
            message: Some(self.message.clone()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_wire().encode_to_vec()
    }

    /// Decodes the payload as `T`; fails when the declared type differs.
    pub fn unpack<T: Payload>(&self) -> Result<T> {
        if self.message_type != T::TYPE_NAME {
            return Err(CoreError::UnknownPayloadType(format!(
                "expected {}, envelope declares {}",
                T::TYPE_NAME,
                self.message_type
            )));
        }
        Ok(T::decode(self.message.value.as_slice())?)
    }

    /// Topic a reply to this envelope goes to.
    pub fn reply_topic(&self) -> String {
        direct_to_app_topic(&self.source_app_id)
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
