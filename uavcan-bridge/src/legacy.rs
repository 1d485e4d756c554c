//! The fixed-schema messages exchanged with the rest of the vehicle.
//!
//! These mirror the legacy parameter protocol field for field: integer node
//! addressing with 0 meaning "all", a signed index where a negative value
//! selects by name, and a 16-byte parameter name.

use serde::{Deserialize, Serialize};

use crate::msg::{GetSetRequest, GetSetResponse, Value};
use crate::NodeId;

/// Maximum length in bytes of a legacy parameter name.
pub const PARAM_ID_LEN: usize = 16;

/// Node id addressing every node.
pub const BROADCAST_NODE_ID: u8 = 0;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::FromRepr,
)]
#[repr(u32)]
pub enum MessageKind {
    #[strum(serialize = "read")]
    Read = 20,
    #[strum(serialize = "list")]
    List = 21,
    #[strum(serialize = "write")]
    Write = 23,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::FromRepr,
)]
#[repr(u8)]
pub enum ParamType {
    Uint8 = 1,
    Int8 = 2,
    Uint16 = 3,
    Int16 = 4,
    Uint32 = 5,
    Int32 = 6,
    Uint64 = 7,
    #[default]
    Int64 = 8,
    Real32 = 9,
    Real64 = 10,
}

/// How a request picks its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSelector<'a> {
    Index(u16),
    Name(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyParamRequest {
    /// 0 addresses all nodes.
    pub node_id: u8,
    pub message_type: MessageKind,
    /// Negative selects by `param_id` instead.
    pub param_index: i16,
    pub param_id: String,
    pub param_type: ParamType,
    pub int_value: i64,
    pub real_value: f32,
}

impl LegacyParamRequest {
    pub fn read_index(node_id: u8, index: i16) -> Self {
        Self {
            node_id,
            message_type: MessageKind::Read,
            param_index: index,
            param_id: String::new(),
            param_type: ParamType::default(),
            int_value: 0,
            real_value: 0.0,
        }
    }

    pub fn read_name(node_id: u8, name: &str) -> Self {
        Self {
            param_index: -1,
            param_id: truncate_param_id(name),
            ..Self::read_index(node_id, -1)
        }
    }

    pub fn list(node_id: u8) -> Self {
        Self {
            message_type: MessageKind::List,
            ..Self::read_index(node_id, 0)
        }
    }

    pub fn write_int(node_id: u8, selector: ParamSelector<'_>, param_type: ParamType, value: i64) -> Self {
        let mut req = Self::select(node_id, selector);
        req.message_type = MessageKind::Write;
        req.param_type = param_type;
        req.int_value = value;
        req
    }

    pub fn write_real(node_id: u8, selector: ParamSelector<'_>, value: f32) -> Self {
        let mut req = Self::select(node_id, selector);
        req.message_type = MessageKind::Write;
        req.param_type = ParamType::Real32;
        req.real_value = value;
        req
    }

    fn select(node_id: u8, selector: ParamSelector<'_>) -> Self {
        match selector {
            ParamSelector::Index(index) => {
                Self::read_index(node_id, i16::try_from(index).unwrap_or(i16::MAX))
            }
            ParamSelector::Name(name) => Self::read_name(node_id, name),
        }
    }

    pub fn selector(&self) -> ParamSelector<'_> {
        match u16::try_from(self.param_index) {
            Ok(index) => ParamSelector::Index(index),
            Err(_) => ParamSelector::Name(&self.param_id),
        }
    }

    /// The value a write carries, typed per `param_type`.
    pub fn write_value(&self) -> Value {
        match self.param_type {
            ParamType::Real32 => Value::Real(self.real_value),
            ParamType::Uint8 => Value::Boolean(self.int_value != 0),
            _ => Value::Integer(self.int_value),
        }
    }

    /// Translate into a bus get/set. Reads carry no value.
    pub fn to_getset(&self) -> GetSetRequest {
        let req = match self.selector() {
            ParamSelector::Index(index) => GetSetRequest::by_index(index),
            ParamSelector::Name(name) => GetSetRequest::by_name(name),
        };
        match self.message_type {
            MessageKind::Write => req.with_value(self.write_value()),
            _ => req,
        }
    }
}

/// Normalized parameter value published for every resolved get/set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyParamValue {
    pub node_id: u8,
    pub param_id: String,
    pub param_index: i16,
    pub param_count: u16,
    pub param_type: ParamType,
    pub int_value: i64,
    pub real_value: f32,
}

impl LegacyParamValue {
    /// `None` when the response carries no value.
    pub fn from_response(
        node: NodeId,
        response: &GetSetResponse,
        param_index: i16,
        param_count: u16,
    ) -> Option<Self> {
        let (param_type, int_value, real_value) = match response.value {
            Value::Empty => return None,
            Value::Integer(v) => (ParamType::Int64, v, 0.0),
            Value::Real(v) => (ParamType::Real32, 0, v),
            Value::Boolean(v) => (ParamType::Uint8, i64::from(v), 0.0),
        };
        Some(Self {
            node_id: node.get(),
            param_id: truncate_param_id(&response.name),
            param_index,
            param_count,
            param_type,
            int_value,
            real_value,
        })
    }
}

/// Cut `name` to at most [`PARAM_ID_LEN`] bytes without splitting a character.
pub fn truncate_param_id(name: &str) -> String {
    if name.len() <= PARAM_ID_LEN {
        return name.to_owned();
    }
    let mut end = PARAM_ID_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}

/// Generic vehicle command; only [`VehicleCommand::PREFLIGHT_UAVCAN`] is handled here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleCommand {
    pub command: u32,
    pub param1: f32,
    pub param2: f32,
}

impl VehicleCommand {
    pub const PREFLIGHT_UAVCAN: u32 = 243;

    pub fn preflight_uavcan(command_id: i32, node_id: i32) -> Self {
        Self {
            command: Self::PREFLIGHT_UAVCAN,
            param1: command_id as f32,
            param2: node_id as f32,
        }
    }

    /// `param1` rounded to the nearest integer.
    pub fn command_id(&self) -> i32 {
        (self.param1 + 0.5) as i32
    }

    /// `param2` rounded to the nearest integer.
    pub fn target_node(&self) -> i32 {
        (self.param2 + 0.5) as i32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedState {
    pub armed: bool,
    pub lockdown: bool,
}

impl ArmedState {
    /// Armed for real: the bus must be handed back.
    pub fn is_flight_armed(&self) -> bool {
        self.armed && !self.lockdown
    }
}
