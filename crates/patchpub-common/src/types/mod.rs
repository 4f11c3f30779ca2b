//! Domain types shared by the catalog reader and the publication sinks

use serde::{Deserialize, Serialize};

/// Lifecycle status of a patch as recorded in the catalog.
///
/// Parsed case-insensitively from the backend's status description. Unknown
/// descriptions are kept verbatim so they can still be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseStatus {
    Open,
    Submitted,
    Vo,
    Released,
    GaReady,
    Other(String),
}

impl ReleaseStatus {
    pub fn parse(description: &str) -> Self {
        match description.trim().to_ascii_uppercase().as_str() {
            "OPEN" => ReleaseStatus::Open,
            "SUBMITTED" => ReleaseStatus::Submitted,
            "VO" => ReleaseStatus::Vo,
            "RELEASED" => ReleaseStatus::Released,
            "GA_READY" | "GA READY" => ReleaseStatus::GaReady,
            _ => ReleaseStatus::Other(description.trim().to_string()),
        }
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseStatus::Open => write!(f, "OPEN"),
            ReleaseStatus::Submitted => write!(f, "SUBMITTED"),
            ReleaseStatus::Vo => write!(f, "VO"),
            ReleaseStatus::Released => write!(f, "RELEASED"),
            ReleaseStatus::GaReady => write!(f, "GA_READY"),
            ReleaseStatus::Other(text) => write!(f, "{}", text),
        }
    }
}

/// Who may download a published file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPolicy {
    /// Public download, no restriction
    Open,
    /// Vendor-only download, enterprise product restriction
    Restricted,
}

impl AccessPolicy {
    /// Derive the policy of one catalog file row.
    ///
    /// A row is open only when it is flagged for external view and the
    /// patch has been released.
    pub fn for_row(external_view: bool, status: &ReleaseStatus) -> Self {
        if external_view && *status == ReleaseStatus::Released {
            AccessPolicy::Open
        } else {
            AccessPolicy::Restricted
        }
    }

    /// Interpret the catalog's external-view flag (`Y`/`y` means visible).
    pub fn external_view_flag(flag: Option<&str>) -> bool {
        flag.map(|f| f.trim().eq_ignore_ascii_case("y")).unwrap_or(false)
    }

    /// Portal download code
    pub fn portal_code(self) -> &'static str {
        match self {
            AccessPolicy::Open => "ALL_DOWNLOADS",
            AccessPolicy::Restricted => "AVAYA_ONLY_DOWNLOAD",
        }
    }

    /// Portal restriction type code
    pub fn restriction_code(self) -> &'static str {
        match self {
            AccessPolicy::Open => "NONE",
            AccessPolicy::Restricted => "ENT_PROD",
        }
    }
}

impl std::fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.portal_code())
    }
}
