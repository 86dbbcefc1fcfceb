//! `tele/<id>/LWT` payload: a bare availability literal, not JSON

use std::fmt;

/// Availability literals a device announced in its discovery record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWillLiterals {
    pub online: String,
    pub offline: String,
}

impl Default for LastWillLiterals {
    fn default() -> Self {
        Self {
            online: "Online".to_owned(),
            offline: "Offline".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn is_online(&self) -> bool {
        matches!(self, Availability::Online)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Availability::Online => write!(f, "online"),
            Availability::Offline => write!(f, "offline"),
        }
    }
}
