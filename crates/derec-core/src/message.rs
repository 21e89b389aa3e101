//! Wire protocol messages
//!
//! Every message on the bus is a flat JSON object carrying
//! `{type, from, to?, timestamp}` plus the fields of its type. Binary
//! payloads are base64 text on the wire and plain bytes everywhere else.

use serde::{Deserialize, Serialize};

use crate::encoding::base64_bytes;
use crate::error::Result;
use crate::types::{ChannelId, HelperId, ParticipantId, Role, SecretId, Timestamp};

/// A routed protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Sender address
    pub from: ParticipantId,

    /// Recipient address, or `None` for a broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ParticipantId>,

    /// Send time (ms since epoch)
    pub timestamp: Timestamp,

    /// Type-specific body
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Create a broadcast envelope
    pub fn broadcast(from: ParticipantId, message: Message, timestamp: Timestamp) -> Self {
        Self {
            from,
            to: None,
            timestamp,
            message,
        }
    }

    /// Create an envelope addressed to a single participant
    pub fn direct(
        from: ParticipantId,
        to: ParticipantId,
        message: Message,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            from,
            to: Some(to),
            timestamp,
            message,
        }
    }

    /// Whether `participant` should see this envelope
    ///
    /// Senders never receive their own messages; directed messages only
    /// reach their recipient.
    pub fn is_for(&self, participant: ParticipantId) -> bool {
        self.from != participant && self.to.map_or(true, |to| to == participant)
    }

    /// Serialize to a JSON frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON frame
    pub fn from_json(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Protocol message bodies, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Presence announcement
    #[serde(rename_all = "camelCase")]
    Announce {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        helper_id: Option<HelperId>,
        transport_uri: String,
    },

    /// Owner asks a helper to pair
    #[serde(rename_all = "camelCase")]
    PairingRequest {
        channel_id: ChannelId,
        #[serde(with = "base64_bytes")]
        contact_message: Vec<u8>,
        owner_name: String,
        is_recovery_mode: bool,
    },

    /// Helper's decision on a pairing request
    #[serde(rename_all = "camelCase")]
    PairingResponse {
        channel_id: ChannelId,
        #[serde(with = "base64_bytes")]
        response_data: Vec<u8>,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        existing_secret_count: Option<u32>,
    },

    /// Owner hands a share to a helper
    #[serde(rename_all = "camelCase")]
    ShareDistribution {
        secret_id: SecretId,
        #[serde(with = "base64_bytes")]
        share_data: Vec<u8>,
        version: u32,
    },

    /// Helper confirms a share was stored
    #[serde(rename_all = "camelCase")]
    ShareAck { secret_id: SecretId, received: bool },

    /// Owner challenges a helper to prove it still holds a share
    #[serde(rename_all = "camelCase")]
    VerificationRequest {
        secret_id: SecretId,
        #[serde(with = "base64_bytes")]
        request_data: Vec<u8>,
    },

    /// Helper's answer to a verification challenge
    #[serde(rename_all = "camelCase")]
    VerificationResponse {
        secret_id: SecretId,
        #[serde(with = "base64_bytes")]
        response_data: Vec<u8>,
        valid: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<VerificationFailure>,
    },

    /// Owner asks a helper to return its share
    #[serde(rename_all = "camelCase")]
    RecoveryRequest {
        secret_id: SecretId,
        #[serde(with = "base64_bytes")]
        request_data: Vec<u8>,
    },

    /// Helper returns its share response for reconstruction
    #[serde(rename_all = "camelCase")]
    RecoveryResponse {
        secret_id: SecretId,
        #[serde(with = "base64_bytes")]
        share_data: Vec<u8>,
    },

    /// Owner asks a helper which shares it holds
    ListSharesRequest,

    /// Helper's share inventory
    #[serde(rename_all = "camelCase")]
    ListSharesResponse { shares: Vec<ShareInfo> },
}

impl Message {
    /// Wire name of this message type
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Announce { .. } => "ANNOUNCE",
            Message::PairingRequest { .. } => "PAIRING_REQUEST",
            Message::PairingResponse { .. } => "PAIRING_RESPONSE",
            Message::ShareDistribution { .. } => "SHARE_DISTRIBUTION",
            Message::ShareAck { .. } => "SHARE_ACK",
            Message::VerificationRequest { .. } => "VERIFICATION_REQUEST",
            Message::VerificationResponse { .. } => "VERIFICATION_RESPONSE",
            Message::RecoveryRequest { .. } => "RECOVERY_REQUEST",
            Message::RecoveryResponse { .. } => "RECOVERY_RESPONSE",
            Message::ListSharesRequest => "LIST_SHARES_REQUEST",
            Message::ListSharesResponse { .. } => "LIST_SHARES_RESPONSE",
        }
    }
}

/// Why a helper could not prove possession of a share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationFailure {
    /// The helper holds no share for the secret
    NoShare,
    /// The helper holds a share but could not answer the challenge
    Invalid,
}

/// One entry of a helper's share inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfo {
    pub secret_id: SecretId,
    pub version: u32,
    pub received_at: Timestamp,
    pub owner_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(n: u8) -> ParticipantId {
        ParticipantId::Helper(HelperId::new(n).unwrap())
    }

    #[test]
    fn test_share_distribution_wire_shape() {
        let envelope = Envelope::direct(
            ParticipantId::Owner,
            helper(2),
            Message::ShareDistribution {
                secret_id: SecretId::new(vec![1, 2, 3]),
                share_data: b"share".to_vec(),
                version: 4,
            },
            1_700_000_000_000,
        );

        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "SHARE_DISTRIBUTION");
        assert_eq!(value["from"], "owner");
        assert_eq!(value["to"], "helper-2");
        assert_eq!(value["secretId"], "AQID");
        assert_eq!(value["shareData"], "c2hhcmU=");
        assert_eq!(value["version"], 4);
    }

    #[test]
    fn test_broadcast_announce_omits_recipient() {
        let envelope = Envelope::broadcast(
            ParticipantId::Owner,
            Message::Announce {
                role: Role::Owner,
                helper_id: None,
                transport_uri: "local://owner".to_string(),
            },
            10,
        );
        let json = envelope.to_json().unwrap();
        assert!(!json.contains("\"to\""));
        assert!(!json.contains("helperId"));
        assert_eq!(Envelope::from_json(&json).unwrap(), envelope);
    }

    #[test]
    fn test_parses_frames_from_other_implementations() {
        let frame = r#"{"type":"VERIFICATION_RESPONSE","from":"helper-1","to":"owner",
            "timestamp":5,"secretId":"AQID","responseData":"","valid":false,"reason":"no-share"}"#;
        let envelope = Envelope::from_json(frame).unwrap();
        assert_eq!(envelope.from, helper(1));
        match envelope.message {
            Message::VerificationResponse { valid, reason, response_data, .. } => {
                assert!(!valid);
                assert_eq!(reason, Some(VerificationFailure::NoShare));
                assert!(response_data.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }

        let list = r#"{"type":"LIST_SHARES_REQUEST","from":"owner","to":"helper-3","timestamp":1}"#;
        assert_eq!(
            Envelope::from_json(list).unwrap().message,
            Message::ListSharesRequest
        );
    }

    #[test]
    fn test_rejects_unknown_sender() {
        let frame = r#"{"type":"LIST_SHARES_REQUEST","from":"mallory","timestamp":1}"#;
        assert!(Envelope::from_json(frame).is_err());
    }

    #[test]
    fn test_addressing() {
        let directed = Envelope::direct(ParticipantId::Owner, helper(1), Message::ListSharesRequest, 0);
        assert!(directed.is_for(helper(1)));
        assert!(!directed.is_for(helper(2)));
        assert!(!directed.is_for(ParticipantId::Owner));

        let broadcast = Envelope::broadcast(helper(2), Message::ListSharesRequest, 0);
        assert!(broadcast.is_for(ParticipantId::Owner));
        assert!(broadcast.is_for(helper(1)));
        assert!(!broadcast.is_for(helper(2)));
    }
}
