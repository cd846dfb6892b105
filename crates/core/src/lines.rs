use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::line::{LineId, PhoneLine};

/// One `[[lines]]` entry from the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub phone_number: String,
    pub label: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default = "default_true")]
    pub send: bool,
    #[serde(default = "default_true")]
    pub receive: bool,
    #[serde(default)]
    pub default_send: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LineRegistryError {
    #[error("no configured line matches `{0}`")]
    UnknownLine(String),
    #[error("no send-capable line is configured as the default")]
    NoDefaultSendLine,
    #[error("more than one line is flagged default_send: {0}")]
    MultipleDefaultSendLines(String),
    #[error("phone number `{0}` is configured more than once")]
    DuplicateNumber(String),
    #[error("`{0}` is not a routable phone number")]
    InvalidNumber(String),
    #[error("default_send line `{0}` is not send-capable")]
    DefaultSendNotSendCapable(String),
}

/// The set of configured send/receive numbers. Built once from config,
/// immutable afterwards, so it is shared across tasks without locking;
/// a config reload constructs a replacement registry.
#[derive(Clone, Debug)]
pub struct LineRegistry {
    lines: Vec<PhoneLine>,
    by_number: HashMap<String, usize>,
    by_id: HashMap<LineId, usize>,
    default_send: Option<usize>,
}

impl LineRegistry {
    pub fn from_config(entries: &[LineConfig]) -> Result<Self, LineRegistryError> {
        let mut lines: Vec<PhoneLine> = Vec::with_capacity(entries.len());
        let mut by_number = HashMap::new();
        let mut by_id = HashMap::new();
        let mut default_send: Option<usize> = None;

        for entry in entries {
            let number = normalize_number(&entry.phone_number)?;
            let id = LineId(entry.id.clone().unwrap_or_else(|| number.clone()));
            let index = lines.len();

            if by_number.insert(number.clone(), index).is_some() {
                return Err(LineRegistryError::DuplicateNumber(number));
            }
            if by_id.insert(id.clone(), index).is_some() {
                return Err(LineRegistryError::DuplicateNumber(id.0));
            }

            if entry.default_send {
                if !entry.send {
                    return Err(LineRegistryError::DefaultSendNotSendCapable(number));
                }
                if let Some(existing) = default_send {
                    return Err(LineRegistryError::MultipleDefaultSendLines(format!(
                        "{}, {}",
                        lines[existing].phone_number, number
                    )));
                }
                default_send = Some(index);
            }

            lines.push(PhoneLine {
                id,
                phone_number: number,
                label: entry.label.clone(),
                tenant_id: entry.tenant.clone().unwrap_or_else(|| "default".to_string()),
                is_send_capable: entry.send,
                is_receive_capable: entry.receive,
            });
        }

        // No explicit flag: the first send-capable line is the default.
        if default_send.is_none() {
            default_send = lines.iter().position(|line| line.is_send_capable);
        }

        Ok(Self { lines, by_number, by_id, default_send })
    }

    pub fn resolve(&self, phone_number: &str) -> Result<&PhoneLine, LineRegistryError> {
        let number = normalize_number(phone_number)
            .map_err(|_| LineRegistryError::UnknownLine(phone_number.to_string()))?;
        self.by_number
            .get(&number)
            .map(|index| &self.lines[*index])
            .ok_or(LineRegistryError::UnknownLine(number))
    }

    pub fn line_by_id(&self, id: &LineId) -> Option<&PhoneLine> {
        self.by_id.get(id).map(|index| &self.lines[*index])
    }

    /// Send-capable lines in configuration order.
    pub fn send_capable_lines(&self) -> impl Iterator<Item = &PhoneLine> {
        self.lines.iter().filter(|line| line.is_send_capable)
    }

    pub fn default_send_line(&self) -> Result<&PhoneLine, LineRegistryError> {
        self.default_send
            .map(|index| &self.lines[index])
            .ok_or(LineRegistryError::NoDefaultSendLine)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Loose E.164 normalization: strips formatting, assumes US for bare 10-digit
/// numbers, and accepts 11-digit national numbers with a leading 1.
pub fn normalize_number(raw: &str) -> Result<String, LineRegistryError> {
    let has_plus = raw.trim_start().starts_with('+');
    let digits: String = raw.chars().filter(|ch| ch.is_ascii_digit()).collect();

    let normalized = if has_plus {
        digits.clone()
    } else if digits.len() == 10 {
        format!("1{digits}")
    } else {
        digits.clone()
    };

    if normalized.len() < 8 || normalized.len() > 15 {
        return Err(LineRegistryError::InvalidNumber(raw.to_string()));
    }
    Ok(format!("+{normalized}"))
}
