use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId(pub String);

/// A routable send/receive number. Lines are process configuration, loaded
/// once at startup and rebuilt on explicit config reload; they are referenced
/// by conversations and messages but never owned by them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneLine {
    pub id: LineId,
    pub phone_number: String,
    pub label: String,
    pub tenant_id: String,
    pub is_send_capable: bool,
    pub is_receive_capable: bool,
}
