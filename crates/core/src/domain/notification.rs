use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Handoff,
    Return,
    Timeout,
    CashPayment,
    Voicemail,
    SystemError,
}

impl NotificationCategory {
    pub const ALL: [NotificationCategory; 6] = [
        Self::Handoff,
        Self::Return,
        Self::Timeout,
        Self::CashPayment,
        Self::Voicemail,
        Self::SystemError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::Return => "return",
            Self::Timeout => "timeout",
            Self::CashPayment => "cash_payment",
            Self::Voicemail => "voicemail",
            Self::SystemError => "system_error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "handoff" => Some(Self::Handoff),
            "return" => Some(Self::Return),
            "timeout" => Some(Self::Timeout),
            "cash_payment" => Some(Self::CashPayment),
            "voicemail" => Some(Self::Voicemail),
            "system_error" => Some(Self::SystemError),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Sms,
    Push,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelToggles {
    pub sms: bool,
    pub push: bool,
}

impl Default for ChannelToggles {
    fn default() -> Self {
        Self { sms: true, push: true }
    }
}

impl ChannelToggles {
    pub fn enabled(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::Sms => self.sms,
            NotificationChannel::Push => self.push,
        }
    }

    pub fn all_disabled(&self) -> bool {
        !self.sms && !self.push
    }
}

/// Per-operator category × channel boolean matrix. An operator with no stored
/// preferences gets everything enabled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    categories: BTreeMap<NotificationCategory, ChannelToggles>,
}

impl NotificationPreferences {
    pub fn all_enabled() -> Self {
        let mut categories = BTreeMap::new();
        for category in NotificationCategory::ALL {
            categories.insert(category, ChannelToggles::default());
        }
        Self { categories }
    }

    pub fn set(&mut self, category: NotificationCategory, toggles: ChannelToggles) {
        self.categories.insert(category, toggles);
    }

    /// Absent categories fall back to enabled-everywhere.
    pub fn for_category(&self, category: NotificationCategory) -> ChannelToggles {
        self.categories.get(&category).copied().unwrap_or_default()
    }

    pub fn enabled_channels(&self, category: NotificationCategory) -> Vec<NotificationChannel> {
        let toggles = self.for_category(category);
        let mut channels = Vec::new();
        if toggles.sms {
            channels.push(NotificationChannel::Sms);
        }
        if toggles.push {
            channels.push(NotificationChannel::Push);
        }
        channels
    }

    pub fn iter(&self) -> impl Iterator<Item = (NotificationCategory, ChannelToggles)> + '_ {
        self.categories.iter().map(|(category, toggles)| (*category, *toggles))
    }
}
