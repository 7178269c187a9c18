use serde::{Deserialize, Serialize};
use std::fmt;

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    /// Map a numeric level, saturating anything above 2 to exactly-once
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => QosLevel::AtMostOnce,
            1 => QosLevel::AtLeastOnce,
            _ => QosLevel::ExactlyOnce,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0..=2 => Ok(Self::from_level(level)),
            other => Err(other),
        }
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qos{}", self.level())
    }
}
