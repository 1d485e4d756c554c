//! Bus-native request/response types.
//!
//! Each service is a marker type implementing [`Service`]; its request and
//! response convert to and from the untyped [`RequestPayload`] and
//! [`ResponsePayload`] that cross the [`Transport`](crate::transport::Transport)
//! boundary.

use serde::{Deserialize, Serialize};

use crate::NodeId;

pub trait Service {
    type Request: Into<RequestPayload>;
    type Response: TryFrom<ResponsePayload>;
    const NAME: &'static str;
}

/// Value of a remote parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Empty,
    Integer(i64),
    Real(f32),
    Boolean(bool),
}

/// Get, and optionally set, one parameter by index or by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetSetRequest {
    /// Used when `name` is empty.
    pub index: u16,
    pub name: String,
    /// `Value::Empty` makes this a pure read.
    pub value: Value,
}

impl GetSetRequest {
    pub fn by_index(index: u16) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }
}

/// An empty name marks the end of the node's parameter table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetSetResponse {
    pub name: String,
    pub value: Value,
}

pub struct GetSet;

impl Service for GetSet {
    type Request = GetSetRequest;
    type Response = GetSetResponse;
    const NAME: &'static str = "param.GetSet";
}

/// Begin (or, with a zero timeout, stop) index enumeration on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginRequest {
    pub parameter_name: String,
    pub timeout_sec: u16,
}

/// A non-zero `error` is a rejection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeginResponse {
    pub error: u8,
}

pub struct Begin;

impl Service for Begin {
    type Request = BeginRequest;
    type Response = BeginResponse;
    const NAME: &'static str = "enumeration.Begin";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub magic_number: u64,
}

impl RestartRequest {
    /// Nodes ignore restart requests that do not carry this value.
    pub const MAGIC_NUMBER: u64 = 0xAC_CE55_1B1E;

    pub fn new() -> Self {
        Self {
            magic_number: Self::MAGIC_NUMBER,
        }
    }
}

impl Default for RestartRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartResponse {
    pub ok: bool,
}

pub struct RestartNode;

impl Service for RestartNode {
    type Request = RestartRequest;
    type Response = RestartResponse;
    const NAME: &'static str = "RestartNode";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum Opcode {
    /// Persist the current parameter values.
    #[strum(serialize = "save")]
    Save,
    /// Reset parameters to factory defaults.
    #[strum(serialize = "erase")]
    Erase,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpcodeRequest {
    pub opcode: Opcode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OpcodeResponse {
    pub ok: bool,
}

pub struct ExecuteOpcode;

impl Service for ExecuteOpcode {
    type Request = OpcodeRequest;
    type Response = OpcodeResponse;
    const NAME: &'static str = "param.ExecuteOpcode";
}

/// Device-initiated report that a user interacted with the node during
/// enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indication {
    pub source: NodeId,
    pub parameter_name: String,
}

/// Audible feedback broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeepCommand {
    pub frequency: f32,
    pub duration: f32,
}

impl BeepCommand {
    pub const SUCCESS: BeepCommand = BeepCommand {
        frequency: 440.0,
        duration: 0.25,
    };
    pub const FAILURE: BeepCommand = BeepCommand {
        frequency: 880.0,
        duration: 1.0,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    GetSet(GetSetRequest),
    Begin(BeginRequest),
    Restart(RestartRequest),
    Opcode(OpcodeRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    GetSet(GetSetResponse),
    Begin(BeginResponse),
    Restart(RestartResponse),
    Opcode(OpcodeResponse),
}

macro_rules! impl_payload {
    ($variant:ident, $req:ty, $resp:ty) => {
        impl From<$req> for RequestPayload {
            fn from(value: $req) -> Self {
                RequestPayload::$variant(value)
            }
        }

        impl From<$resp> for ResponsePayload {
            fn from(value: $resp) -> Self {
                ResponsePayload::$variant(value)
            }
        }

        impl TryFrom<ResponsePayload> for $resp {
            type Error = ResponsePayload;

            fn try_from(value: ResponsePayload) -> Result<Self, Self::Error> {
                match value {
                    ResponsePayload::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }
    };
}

impl_payload!(GetSet, GetSetRequest, GetSetResponse);
impl_payload!(Begin, BeginRequest, BeginResponse);
impl_payload!(Restart, RestartRequest, RestartResponse);
impl_payload!(Opcode, OpcodeRequest, OpcodeResponse);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_conversion_checks_variant() {
        let payload = ResponsePayload::from(BeginResponse { error: 0 });
        assert!(GetSetResponse::try_from(payload.clone()).is_err());
        assert_eq!(BeginResponse::try_from(payload).unwrap().error, 0);
    }

    #[test]
    fn test_request_builders() {
        let req = GetSetRequest::by_name("esc_index").with_value(Value::Integer(3));
        assert_eq!(req.index, 0);
        assert_eq!(req.name, "esc_index");
        assert_eq!(req.value, Value::Integer(3));
        assert_eq!(GetSetRequest::by_index(4).value, Value::Empty);
    }

    #[test]
    fn test_restart_carries_magic() {
        assert_eq!(RestartRequest::new().magic_number, RestartRequest::MAGIC_NUMBER);
    }
}
