use serde::{Deserialize, Serialize};

use crate::client::models::place::Place;
use crate::common::geo::Coordinate;

/// Search radius used for the first place lookup of a session, in meters.
pub const DEFAULT_SEARCH_RADIUS_M: u32 = 5000;

/// Closed set of lifecycle states for a meet session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetStatus {
    /// Record persisted, share link not yet produced.
    Created,
    /// Link dispatched, waiting for the other party's location.
    #[serde(rename = "link_sent")]
    AwaitingReceiver,
    /// Both locations known, midpoint not searched yet.
    Connected,
    /// Midpoint and candidate places written.
    Ready,
    /// One party proposed a specific place.
    Proposed,
    /// Counterpart confirmed the proposal. Terminal.
    Confirmed,
}

impl MeetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetStatus::Created => "created",
            MeetStatus::AwaitingReceiver => "link_sent",
            MeetStatus::Connected => "connected",
            MeetStatus::Ready => "ready",
            MeetStatus::Proposed => "proposed",
            MeetStatus::Confirmed => "confirmed",
        }
    }

    /// Parse a stored status string. Accepts the older `pending`/`joined`
    /// spellings still present in rows written by previous app versions.
    pub fn parse(s: &str) -> Option<MeetStatus> {
        match s {
            "created" => Some(MeetStatus::Created),
            "link_sent" | "pending" => Some(MeetStatus::AwaitingReceiver),
            "connected" | "joined" => Some(MeetStatus::Connected),
            "ready" => Some(MeetStatus::Ready),
            "proposed" => Some(MeetStatus::Proposed),
            "confirmed" => Some(MeetStatus::Confirmed),
            _ => None,
        }
    }

    /// Both locations are known in this state and later ones.
    pub fn receiver_captured(self) -> bool {
        matches!(
            self,
            MeetStatus::Connected | MeetStatus::Ready | MeetStatus::Proposed | MeetStatus::Confirmed
        )
    }

    /// Central transition table. Every mutating call validates here instead
    /// of scattering status comparisons across call sites.
    pub fn allows(self, op: SessionOp) -> bool {
        use MeetStatus::*;
        match op {
            SessionOp::CaptureReceiverLocation => self == AwaitingReceiver,
            SessionOp::ComputeMidpointAndSearch => self == Connected,
            // Connected covers re-proposal after a denial, Proposed covers
            // overwriting with a different place
            SessionOp::ProposePlace => matches!(self, Ready | Connected | Proposed),
            SessionOp::ConfirmProposal => self == Proposed,
            SessionOp::DenyProposal => self == Proposed,
            // selection only needs a non-empty candidate list, which the
            // service checks; no status restriction
            SessionOp::SelectPlace => true,
        }
    }
}

impl std::fmt::Display for MeetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutating operations the lifecycle can attempt on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    CaptureReceiverLocation,
    ComputeMidpointAndSearch,
    ProposePlace,
    ConfirmProposal,
    DenyProposal,
    SelectPlace,
}

impl SessionOp {
    pub fn name(&self) -> &'static str {
        match self {
            SessionOp::CaptureReceiverLocation => "capture_receiver_location",
            SessionOp::ComputeMidpointAndSearch => "compute_midpoint_and_search",
            SessionOp::ProposePlace => "propose_place",
            SessionOp::ConfirmProposal => "confirm_proposal",
            SessionOp::DenyProposal => "deny_proposal",
            SessionOp::SelectPlace => "select_place",
        }
    }
}

/// The two-party negotiation aggregate persisted in the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetSession {
    pub id: String,
    /// Open category label, mapped to provider query parameters at search
    /// time. Unknown labels fall back to a generic point-of-interest query.
    pub category: String,
    pub invite_token: String,
    pub sender_location: Coordinate,
    pub receiver_location: Option<Coordinate>,
    /// When true the sender coordinate is rounded before midpoint math.
    /// The precise coordinate stays in the record for the owning party.
    pub privacy_masked: bool,
    pub midpoint: Option<Coordinate>,
    /// Ranked candidates from the latest search cycle. Replaced, never
    /// appended, when a search runs again.
    pub candidate_places: Vec<Place>,
    pub selected_place_id: Option<String>,
    pub proposed_place_id: Option<String>,
    pub confirmed_place_id: Option<String>,
    pub status: MeetStatus,
    pub search_radius_m: u32,
    pub created_at: i64,
    pub updated_at: i64,
}
