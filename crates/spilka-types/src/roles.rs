use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(pub String);

/// Membership tiers in the organization's referral hierarchy.
///
/// Variant order IS the progression order; all "at least X" checks are
/// plain comparisons so there is a single source of truth for the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Supporter,
    Candidate,
    Member,
    HonoraryMember,
    NetworkLeader,
    RegionalLeader,
    NationalLeader,
    NetworkGuide,
}

impl MembershipRole {
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Leader tier: network leader and above.
    pub fn is_leader(self) -> bool {
        self >= Self::NetworkLeader
    }

    /// Regional leader tier and above.
    pub fn is_regional_leader(self) -> bool {
        self >= Self::RegionalLeader
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supporter => "supporter",
            Self::Candidate => "candidate",
            Self::Member => "member",
            Self::HonoraryMember => "honorary_member",
            Self::NetworkLeader => "network_leader",
            Self::RegionalLeader => "regional_leader",
            Self::NationalLeader => "national_leader",
            Self::NetworkGuide => "network_guide",
        }
    }
}

impl FromStr for MembershipRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supporter" => Ok(Self::Supporter),
            "candidate" => Ok(Self::Candidate),
            "member" => Ok(Self::Member),
            "honorary_member" => Ok(Self::HonoraryMember),
            "network_leader" => Ok(Self::NetworkLeader),
            "regional_leader" => Ok(Self::RegionalLeader),
            "national_leader" => Ok(Self::NationalLeader),
            "network_guide" => Ok(Self::NetworkGuide),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

impl fmt::Display for MembershipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative staff tier, orthogonal to membership progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    None,
    NewsEditor,
    Admin,
    SuperAdmin,
}

impl StaffRole {
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Admin and super admin bypass relationship checks entirely.
    pub fn is_staff_admin(self) -> bool {
        self >= Self::Admin
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NewsEditor => "news_editor",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl FromStr for StaffRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "news_editor" => Ok(Self::NewsEditor),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
