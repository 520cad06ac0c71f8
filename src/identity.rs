//! Stable application identity and the keys derived from it

use crate::config::Scope;
use crate::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique token shared by every process of one logical application.
///
/// This is a GUID baked in at build time, never a human readable title, so that unrelated
/// applications cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApplicationIdentity(Uuid);

impl ApplicationIdentity {
    pub fn parse(guid: &str) -> Result<Self, Error> {
        let trimmed = guid.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingIdentity);
        }
        let uuid = Uuid::parse_str(trimmed)
            .map_err(|e| Error::InvalidIdentity(guid.to_owned(), e.to_string()))?;
        if uuid.is_nil() {
            return Err(Error::InvalidIdentity(
                guid.to_owned(),
                "the nil GUID is shared by every application".to_owned(),
            ));
        }
        Ok(Self(uuid))
    }

    /// Reads the identity embedded at compile time, typically
    /// `option_env!("LONE_INSTANCE_APP_GUID")`
    pub fn from_build_metadata(value: Option<&str>) -> Result<Self, Error> {
        match value {
            None => Err(Error::MissingIdentity),
            Some(v) => Self::parse(v),
        }
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Derive the key naming both the exclusion object and the signal channel
    pub fn key(&self, scope: Scope) -> InstanceKey {
        let prefix = match scope {
            Scope::Session => "local-singleton",
            Scope::System => "global-singleton",
        };
        InstanceKey {
            name: format!("{}-{}", prefix, self.0.as_hyphenated()),
            scope,
        }
    }
}

impl FromStr for ApplicationIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for ApplicationIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Name of the rendezvous point for one identity within one scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    name: String,
    scope: Scope,
}

impl InstanceKey {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl Display for InstanceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
