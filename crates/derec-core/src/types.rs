//! Participant identities and identifier newtypes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::encoding;
use crate::error::{Error, Result};
use crate::MAX_HELPERS;

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Helper slot number, always in `1..=MAX_HELPERS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct HelperId(u8);

impl HelperId {
    /// Create a helper id, rejecting values outside the helper slots
    pub fn new(id: u8) -> Result<Self> {
        if id == 0 || id > MAX_HELPERS {
            return Err(Error::InvalidHelperId(id as u64));
        }
        Ok(Self(id))
    }

    /// Every helper slot in ascending order
    pub fn all() -> impl Iterator<Item = HelperId> {
        (1..=MAX_HELPERS).map(HelperId)
    }

    /// Raw slot number
    pub fn get(self) -> u8 {
        self.0
    }

    /// The stable channel this helper is reached on (equal to its id)
    pub fn channel_id(self) -> ChannelId {
        ChannelId(self.0 as u64)
    }

    /// Map a channel back to the helper that owns it
    pub fn from_channel(channel: ChannelId) -> Result<Self> {
        let id = u8::try_from(channel.0).map_err(|_| Error::InvalidHelperId(channel.0))?;
        Self::new(id)
    }

    /// Transport URI advertised for this helper
    pub fn transport_uri(self) -> String {
        format!("local://helper-{}", self.0)
    }
}

impl TryFrom<u8> for HelperId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<HelperId> for u8 {
    fn from(id: HelperId) -> Self {
        id.0
    }
}

impl fmt::Display for HelperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric channel identifier handed to the secret-sharing engine
///
/// Carried on the wire as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(ChannelId)
            .map_err(|_| Error::InvalidChannelId(s.to_string()))
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Role announced by a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Helper,
}

/// Bus address of a participant: `"owner"` or `"helper-{n}"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParticipantId {
    Owner,
    Helper(HelperId),
}

impl ParticipantId {
    /// The helper id, if this address belongs to a helper
    pub fn helper_id(self) -> Option<HelperId> {
        match self {
            ParticipantId::Owner => None,
            ParticipantId::Helper(id) => Some(id),
        }
    }

    /// Role played by this participant
    pub fn role(self) -> Role {
        match self {
            ParticipantId::Owner => Role::Owner,
            ParticipantId::Helper(_) => Role::Helper,
        }
    }

    /// Transport URI advertised in announcements
    pub fn transport_uri(self) -> String {
        format!("local://{}", self)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantId::Owner => write!(f, "owner"),
            ParticipantId::Helper(id) => write!(f, "helper-{}", id),
        }
    }
}

impl FromStr for ParticipantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "owner" {
            return Ok(ParticipantId::Owner);
        }
        let id = s
            .strip_prefix("helper-")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| Error::InvalidParticipant(s.to_string()))?;
        Ok(ParticipantId::Helper(HelperId::new(id)?))
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.to_string()
    }
}

impl From<HelperId> for ParticipantId {
    fn from(id: HelperId) -> Self {
        ParticipantId::Helper(id)
    }
}

/// Opaque secret identifier generated by the owner
///
/// Carried on the wire as base64 of the raw identifier bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretId(Vec<u8>);

impl SecretId {
    /// Wrap raw identifier bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self(encoding::decode(s)?))
    }

    /// Short display format (first 4 bytes as hex)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..self.0.len().min(4)])
    }
}

impl fmt::Debug for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretId({})", self.to_base64())
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl AsRef<[u8]> for SecretId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for SecretId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for SecretId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SecretId::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_id_bounds() {
        assert!(HelperId::new(0).is_err());
        assert!(HelperId::new(MAX_HELPERS + 1).is_err());
        assert_eq!(HelperId::new(2).unwrap().get(), 2);
        assert_eq!(HelperId::all().count(), MAX_HELPERS as usize);
    }

    #[test]
    fn test_participant_addresses() {
        let helper = ParticipantId::Helper(HelperId::new(3).unwrap());
        assert_eq!(helper.to_string(), "helper-3");
        assert_eq!("helper-3".parse::<ParticipantId>().unwrap(), helper);
        assert_eq!("owner".parse::<ParticipantId>().unwrap(), ParticipantId::Owner);
        assert!("helper-9".parse::<ParticipantId>().is_err());
        assert!("observer".parse::<ParticipantId>().is_err());
        assert_eq!(helper.transport_uri(), "local://helper-3");
    }

    #[test]
    fn test_channel_maps_to_helper() {
        let id = HelperId::new(1).unwrap();
        assert_eq!(HelperId::from_channel(id.channel_id()).unwrap(), id);
        assert!(HelperId::from_channel(ChannelId(300)).is_err());
    }

    #[test]
    fn test_secret_id_is_unique_and_base64() {
        let a = SecretId::generate();
        let b = SecretId::generate();
        assert_ne!(a, b);
        assert_eq!(SecretId::from_base64(&a.to_base64()).unwrap(), a);
        assert_eq!(a.short().len(), 8);
    }
}
