//! Per-operator view state. The display filter and the active send line are
//! independent axes: narrowing the list to one line does not change where new
//! outbound messages are sent from, and vice versa. The state is small and
//! serializable so clients can persist it locally per operator.

use serde::{Deserialize, Serialize};

use crate::domain::line::{LineId, PhoneLine};
use crate::lines::{LineRegistry, LineRegistryError};

/// Which line's conversations are displayed. `All` is a display-only
/// sentinel; it can never be selected as a send line (the send axis carries a
/// concrete `LineId` or nothing).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "line", rename_all = "snake_case")]
pub enum LineFilter {
    #[default]
    All,
    Line(LineId),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub filter: LineFilter,
    pub active_send_line: Option<LineId>,
}

impl SessionView {
    pub fn set_filter(&mut self, filter: LineFilter) {
        self.filter = filter;
    }

    pub fn set_active_send_line(&mut self, line: LineId) {
        self.active_send_line = Some(line);
    }

    /// The concrete line outbound messages go out from: the operator's
    /// selection when it still resolves to a send-capable line, otherwise the
    /// registry's configured default.
    pub fn effective_send_line<'a>(
        &self,
        registry: &'a LineRegistry,
    ) -> Result<&'a PhoneLine, LineRegistryError> {
        if let Some(selected) = &self.active_send_line {
            if let Some(line) = registry.line_by_id(selected) {
                if line.is_send_capable {
                    return Ok(line);
                }
            }
        }
        registry.default_send_line()
    }

    /// Whether a conversation on the given line passes the display filter.
    pub fn shows_line(&self, line: Option<&LineId>) -> bool {
        match &self.filter {
            LineFilter::All => true,
            LineFilter::Line(selected) => line == Some(selected),
        }
    }
}
