use std::fmt;

use serde::{Deserialize, Serialize};

/// Charmhub risk levels, least to most stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Risk {
    Edge,
    Beta,
    Candidate,
    Stable,
}

impl Risk {
    pub const ALL: [Risk; 4] = [Risk::Edge, Risk::Beta, Risk::Candidate, Risk::Stable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Edge => "edge",
            Risk::Beta => "beta",
            Risk::Candidate => "candidate",
            Risk::Stable => "stable",
        }
    }

    pub fn parse(s: &str) -> Option<Risk> {
        Risk::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ChannelError {
    InvalidRisk(String),
    Empty,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidRisk(risk) => write!(f, "invalid risk: {risk}"),
            ChannelError::Empty => write!(f, "empty channel spec"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// A charmhub channel: `track/risk` coordinates an artifact is published to.
///
/// Accepted spellings follow the store conventions: a bare risk implies the
/// `latest` track, a bare track implies the `stable` risk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub track: String,
    pub risk: Risk,
}

impl Channel {
    pub fn new(track: impl Into<String>, risk: Risk) -> Self {
        Channel {
            track: track.into(),
            risk,
        }
    }

    pub fn parse(value: &str) -> Result<Channel, ChannelError> {
        if value.is_empty() {
            return Err(ChannelError::Empty);
        }
        if let Some(risk) = Risk::parse(value) {
            // risk-only value, assume the 'latest' track
            return Ok(Channel::new("latest", risk));
        }
        match value.split_once('/') {
            Some((track, risk)) => match Risk::parse(risk) {
                Some(risk) => Ok(Channel::new(track, risk)),
                None => Err(ChannelError::InvalidRisk(risk.to_string())),
            },
            // track-only value, assume the 'stable' risk
            None => Ok(Channel::new(value, Risk::Stable)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.track, self.risk)
    }
}

impl Serialize for Channel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Channel::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Group channels by track, preserving first-appearance order.
///
/// A recipe can only target one track, so a branch publishing to several
/// tracks needs one recipe per track; each group carries every configured
/// channel that shares the track.
pub fn group_by_track(channels: &[Channel]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for channel in channels {
        match groups.iter_mut().find(|(track, _)| *track == channel.track) {
            Some((_, members)) => members.push(channel.to_string()),
            None => groups.push((channel.track.clone(), vec![channel.to_string()])),
        }
    }
    groups
}
