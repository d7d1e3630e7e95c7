//! Signaling message types
//!
//! Field names follow the browser `RTCSessionDescriptionInit` and
//! `RTCIceCandidateInit` dictionaries so clients can post them unchanged.

use crate::session::SessionId;
use crate::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// SDP message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// Offer or answer, optionally tagged with the channel it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body
    pub sdp: String,

    /// Channel id
    #[serde(
        rename = "channelId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_id: Option<SessionId>,
}

impl SessionDescription {
    /// Create an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
            channel_id: None,
        }
    }

    /// Create an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
            channel_id: None,
        }
    }

    /// Tag with a channel id
    pub fn with_channel_id(mut self, channel_id: impl Into<SessionId>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}

/// ICE candidate record
///
/// Absent `sdpMid` and `sdpMLineIndex` are carried as `""` and `0`, and are
/// always present on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, deserialize_with = "null_as_default")]
    pub sdp_mid: String,

    /// Index of the media description
    #[serde(
        rename = "sdpMLineIndex",
        default,
        deserialize_with = "null_as_default"
    )]
    pub sdp_mline_index: u16,
}

impl IceCandidate {
    /// Create a candidate record
    pub fn new(candidate: impl Into<String>, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of a request that starts a session
///
/// With `sdp` present the client is offering; otherwise the server offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    /// Channel id chosen by the client
    #[serde(rename = "channelId", default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<SessionId>,

    /// Description type of a client offer
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sdp_type: Option<SdpType>,

    /// SDP of a client offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

impl OfferRequest {
    /// The client's description, if it sent one
    pub fn client_description(&self) -> Option<SessionDescription> {
        let sdp = self.sdp.as_ref()?;
        Some(SessionDescription {
            sdp_type: self.sdp_type.unwrap_or(SdpType::Offer),
            sdp: sdp.clone(),
            channel_id: self.channel_id.clone(),
        })
    }
}

/// Body of a request that relays a client ICE candidate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRequest {
    /// Channel the candidate belongs to
    #[serde(rename = "channelId", default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<SessionId>,

    /// The candidate
    #[serde(flatten)]
    pub candidate: IceCandidate,
}

/// A server candidate relayed to clients that watch every channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedCandidate {
    /// Channel the candidate belongs to
    #[serde(rename = "channelId")]
    pub channel_id: SessionId,

    /// The candidate
    #[serde(flatten)]
    pub candidate: IceCandidate,
}
