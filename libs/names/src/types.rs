//! Typed tag definitions for provisioned entities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{define_tag, TagError};

// =============================================================================
// Machines
// =============================================================================

define_tag!(
    /// Tag of a machine or of a container nested on one.
    MachineTag,
    "machine",
    validate_machine_suffix
);

impl MachineTag {
    /// Builds a tag from a machine id such as `0` or `0/lxc/1`.
    pub fn from_id(id: &str) -> Result<Self, TagError> {
        if id.contains('-') {
            return Err(TagError::InvalidId {
                kind: Self::KIND,
                id: id.to_string(),
            });
        }
        let suffix = id.replace('/', "-");
        validate_machine_suffix(&suffix).map_err(|_| TagError::InvalidId {
            kind: Self::KIND,
            id: id.to_string(),
        })?;
        Ok(Self(suffix))
    }

    /// Returns the machine id (`0/lxc/1` for `machine-0-lxc-1`).
    #[must_use]
    pub fn id(&self) -> String {
        self.0.replace('-', "/")
    }

    /// Returns true if the machine is a container hosted on another machine.
    #[must_use]
    pub fn is_container(&self) -> bool {
        self.0.contains('-')
    }

    /// Returns the kind of container this machine is, if it is one.
    #[must_use]
    pub fn container_type(&self) -> Option<&str> {
        let mut parts = self.0.rsplit('-');
        let _number = parts.next();
        parts.next()
    }

    /// Returns the tag of the machine hosting this container.
    #[must_use]
    pub fn parent(&self) -> Option<MachineTag> {
        let (rest, _number) = self.0.rsplit_once('-')?;
        let (parent, _kind) = rest.rsplit_once('-').unwrap_or((rest, ""));
        if parent == rest {
            return None;
        }
        Some(Self(parent.to_string()))
    }
}

fn validate_machine_suffix(suffix: &str) -> Result<(), TagError> {
    let invalid = || TagError::InvalidId {
        kind: MachineTag::KIND,
        id: suffix.to_string(),
    };

    let mut parts = suffix.split('-');
    match parts.next() {
        Some(first) if is_number(first) => {}
        _ => return Err(invalid()),
    }

    // Remaining parts come in (container kind, number) pairs.
    loop {
        match (parts.next(), parts.next()) {
            (None, _) => return Ok(()),
            (Some(kind), Some(number)) if is_container_kind(kind) && is_number(number) => {}
            _ => return Err(invalid()),
        }
    }
}

fn is_number(s: &str) -> bool {
    match s.as_bytes() {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        bytes => bytes.iter().all(u8::is_ascii_digit),
    }
}

fn is_container_kind(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase())
}

// =============================================================================
// Environments
// =============================================================================

define_tag!(
    /// Tag of an environment (model).
    EnvironTag,
    "environment",
    validate_environ_suffix
);

fn validate_environ_suffix(suffix: &str) -> Result<(), TagError> {
    let valid = !suffix.is_empty()
        && suffix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(TagError::InvalidId {
            kind: EnvironTag::KIND,
            id: suffix.to_string(),
        })
    }
}

// =============================================================================
// Container Types
// =============================================================================

/// Kind of container a host machine can provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Lxc,
    Kvm,
    Lxd,
}

impl ContainerType {
    /// All supported container types.
    pub const ALL: [ContainerType; 3] = [ContainerType::Lxc, ContainerType::Kvm, ContainerType::Lxd];

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Lxc => "lxc",
            ContainerType::Kvm => "kvm",
            ContainerType::Lxd => "lxd",
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerType {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContainerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TagError::InvalidContainerType(s.to_string()))
    }
}
