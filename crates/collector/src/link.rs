use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A monitored network path. Top-level partition key for buffers and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkId {
    Wifi,
    Lan,
}

impl LinkId {
    pub const ALL: [LinkId; 2] = [LinkId::Wifi, LinkId::Lan];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkId::Wifi => "wifi",
            LinkId::Lan => "lan",
        }
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wifi" => Ok(LinkId::Wifi),
            "lan" => Ok(LinkId::Lan),
            _ => Err(Error::UnknownLink(s.to_string())),
        }
    }
}
