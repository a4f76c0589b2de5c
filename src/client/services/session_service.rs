use std::sync::Arc;

use thiserror::Error;

use crate::client::models::place::dedup_places;
use crate::client::models::session::{
    MeetSession, MeetStatus, SessionOp, DEFAULT_SEARCH_RADIUS_M,
};
use crate::client::services::invite_service::{self, InviteDispatch};
use crate::client::services::places_service::{PlaceSearch, PlacesError};
use crate::common::geo::{self, Coordinate};
use crate::store::{SessionStore, StoreError, Subscription};

/// Candidate cap for the two-party negotiation flow.
pub const SESSION_FLOW_CANDIDATES: usize = 3;
/// Candidate cap for the ad-hoc invite flow.
pub const ADHOC_FLOW_CANDIDATES: usize = 5;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("coordinate out of range: {latitude},{longitude}")]
    InvalidLocation { latitude: f64, longitude: f64 },
    #[error("{op} is not allowed while the session is {from}")]
    IllegalTransition { from: MeetStatus, op: &'static str },
    #[error("place {0} is not among the current candidates")]
    UnknownPlace(String),
    #[error("invite token does not match this session")]
    InviteTokenMismatch,
    #[error(transparent)]
    Provider(#[from] PlacesError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn check_location(c: Coordinate) -> Result<(), SessionError> {
    if c.in_range() {
        Ok(())
    } else {
        Err(SessionError::InvalidLocation {
            latitude: c.latitude,
            longitude: c.longitude,
        })
    }
}

fn check_transition(status: MeetStatus, op: SessionOp) -> Result<(), SessionError> {
    if status.allows(op) {
        Ok(())
    } else {
        Err(SessionError::IllegalTransition {
            from: status,
            op: op.name(),
        })
    }
}

/// Drives a meet session through its lifecycle. Every mutation follows
/// read -> validate -> compute -> conditional write, so two devices racing
/// on the same session can never overwrite a later status with a stale one.
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    places: Arc<dyn PlaceSearch>,
    invites: Arc<dyn InviteDispatch>,
    link_base: String,
    default_radius_m: u32,
    max_candidates: usize,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        places: Arc<dyn PlaceSearch>,
        invites: Arc<dyn InviteDispatch>,
        link_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            places,
            invites,
            link_base: link_base.into(),
            default_radius_m: DEFAULT_SEARCH_RADIUS_M,
            max_candidates: SESSION_FLOW_CANDIDATES,
        }
    }

    /// Ad-hoc invite flavour: more candidates, same state machine.
    pub fn with_max_candidates(mut self, cap: usize) -> Self {
        self.max_candidates = cap;
        self
    }

    pub fn with_default_radius(mut self, radius_m: u32) -> Self {
        self.default_radius_m = radius_m;
        self
    }

    /// Create a session, dispatch the share link and advance to
    /// `AwaitingReceiver`. Dispatch failures are logged, never fatal.
    pub async fn create_session(
        &self,
        sender_location: Coordinate,
        category: &str,
        mask_privacy: bool,
        recipient_hint: Option<&str>,
    ) -> Result<MeetSession, SessionError> {
        check_location(sender_location)?;

        let now = chrono::Utc::now().timestamp();
        let mut session = MeetSession {
            id: uuid::Uuid::new_v4().to_string(),
            category: category.to_string(),
            invite_token: invite_service::generate_invite_token(),
            sender_location,
            receiver_location: None,
            privacy_masked: mask_privacy,
            midpoint: None,
            candidate_places: Vec::new(),
            selected_place_id: None,
            proposed_place_id: None,
            confirmed_place_id: None,
            status: MeetStatus::Created,
            search_radius_m: self.default_radius_m,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&session).await?;
        log::info!(
            "[SESSION] Created session {} category={} masked={}",
            session.id,
            session.category,
            session.privacy_masked
        );

        match invite_service::build_session_url(&self.link_base, &session.id, &session.invite_token)
        {
            Ok(url) => {
                if let Err(e) = self.invites.dispatch(&url, recipient_hint).await {
                    log::warn!("[SESSION] Invite dispatch failed for {}: {}", session.id, e);
                }
            }
            Err(e) => log::warn!("[SESSION] Could not build session link: {}", e),
        }

        session.status = MeetStatus::AwaitingReceiver;
        session.updated_at = chrono::Utc::now().timestamp();
        self.store.update_where(MeetStatus::Created, &session).await?;
        Ok(session)
    }

    /// Record the invitee's location and advance to `Connected`. Calling
    /// this again once a receiver location exists is a deliberate no-op:
    /// retried network calls deliver the same event twice and the first
    /// captured coordinate wins.
    pub async fn capture_receiver_location(
        &self,
        session_id: &str,
        receiver_location: Coordinate,
        invite_token: Option<&str>,
    ) -> Result<(), SessionError> {
        check_location(receiver_location)?;

        let session = self.store.get_by_id(session_id).await?;
        if let Some(token) = invite_token {
            if token != session.invite_token {
                return Err(SessionError::InviteTokenMismatch);
            }
        }
        if session.status.receiver_captured() {
            log::info!(
                "[SESSION] Duplicate receiver capture for {} ignored (status {})",
                session_id,
                session.status
            );
            return Ok(());
        }
        check_transition(session.status, SessionOp::CaptureReceiverLocation)?;

        let mut updated = session;
        updated.receiver_location = Some(receiver_location);
        updated.status = MeetStatus::Connected;
        updated.updated_at = chrono::Utc::now().timestamp();
        match self
            .store
            .update_where(MeetStatus::AwaitingReceiver, &updated)
            .await
        {
            Ok(()) => {
                log::info!("[SESSION] Session {} connected", session_id);
                Ok(())
            }
            Err(StoreError::Conflict) => {
                // the other device captured first; same duplicate-event case
                let current = self.store.get_by_id(session_id).await?;
                if current.status.receiver_captured() {
                    Ok(())
                } else {
                    Err(StoreError::Conflict.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Compute the midpoint, search places around it (doubling the radius
    /// exactly once when the first pass yields nothing usable) and advance
    /// to `Ready`. Nothing is written unless the whole operation succeeds.
    pub async fn compute_midpoint_and_search(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.store.get_by_id(session_id).await?;
        check_transition(session.status, SessionOp::ComputeMidpointAndSearch)?;
        let receiver = session.receiver_location.ok_or(SessionError::IllegalTransition {
            from: session.status,
            op: SessionOp::ComputeMidpointAndSearch.name(),
        })?;

        let midpoint = geo::compute_midpoint(session.sender_location, receiver, session.privacy_masked);
        let mut radius = session.search_radius_m;

        // A transient first attempt counts as "too sparse" and shares the
        // single expansion retry; any other failure propagates untouched.
        let first_pass = match self.places.search(midpoint, &session.category, radius).await {
            Ok(places) => dedup_places(places),
            Err(PlacesError::Transient(reason)) => {
                log::warn!(
                    "[SESSION] First search for {} failed transiently ({}), retrying wider",
                    session_id,
                    reason
                );
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut candidates = if first_pass.is_empty() {
            radius *= 2;
            log::info!(
                "[SESSION] No usable places for {}, expanding radius to {}m",
                session_id,
                radius
            );
            dedup_places(self.places.search(midpoint, &session.category, radius).await?)
        } else {
            first_pass
        };
        candidates.truncate(self.max_candidates);

        let mut updated = session;
        updated.midpoint = Some(midpoint);
        updated.candidate_places = candidates;
        updated.search_radius_m = radius;
        updated.status = MeetStatus::Ready;
        updated.updated_at = chrono::Utc::now().timestamp();
        match self.store.update_where(MeetStatus::Connected, &updated).await {
            Ok(()) => {
                log::info!(
                    "[SESSION] Session {} ready with {} candidates (radius {}m)",
                    session_id,
                    updated.candidate_places.len(),
                    radius
                );
                Ok(())
            }
            Err(StoreError::Conflict) => {
                // both devices observed Connected and ran the search; the
                // one that lost keeps the winner's identical result set
                let current = self.store.get_by_id(session_id).await?;
                if matches!(
                    current.status,
                    MeetStatus::Ready | MeetStatus::Proposed | MeetStatus::Confirmed
                ) {
                    log::info!(
                        "[SESSION] Search for {} raced with another device, keeping its result",
                        session_id
                    );
                    Ok(())
                } else {
                    Err(StoreError::Conflict.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Propose one of the current candidates to the counterpart.
    pub async fn propose_place(&self, session_id: &str, place_id: &str) -> Result<(), SessionError> {
        let session = self.store.get_by_id(session_id).await?;
        check_transition(session.status, SessionOp::ProposePlace)?;
        if !session.candidate_places.iter().any(|p| p.id == place_id) {
            return Err(SessionError::UnknownPlace(place_id.to_string()));
        }

        let observed = session.status;
        let mut updated = session;
        updated.proposed_place_id = Some(place_id.to_string());
        updated.status = MeetStatus::Proposed;
        updated.updated_at = chrono::Utc::now().timestamp();
        self.store.update_where(observed, &updated).await?;
        log::info!("[SESSION] Session {} proposes place {}", session_id, place_id);
        Ok(())
    }

    /// Accept the counterpart's proposal. Terminal.
    pub async fn confirm_proposal(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.store.get_by_id(session_id).await?;
        check_transition(session.status, SessionOp::ConfirmProposal)?;

        let mut updated = session;
        updated.confirmed_place_id = updated.proposed_place_id.clone();
        updated.status = MeetStatus::Confirmed;
        updated.updated_at = chrono::Utc::now().timestamp();
        self.store.update_where(MeetStatus::Proposed, &updated).await?;
        log::info!(
            "[SESSION] Session {} confirmed place {:?}",
            session_id,
            updated.confirmed_place_id
        );
        Ok(())
    }

    /// Decline the proposal and fall back to `Connected` so another place
    /// can be proposed.
    pub async fn deny_proposal(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.store.get_by_id(session_id).await?;
        check_transition(session.status, SessionOp::DenyProposal)?;

        let mut updated = session;
        updated.proposed_place_id = None;
        updated.status = MeetStatus::Connected;
        updated.updated_at = chrono::Utc::now().timestamp();
        self.store.update_where(MeetStatus::Proposed, &updated).await?;
        log::info!("[SESSION] Session {} proposal denied", session_id);
        Ok(())
    }

    /// Non-negotiated selection used by the ad-hoc flow: pick (or re-pick)
    /// a candidate without any status transition.
    pub async fn select_place(&self, session_id: &str, place_id: &str) -> Result<(), SessionError> {
        let session = self.store.get_by_id(session_id).await?;
        check_transition(session.status, SessionOp::SelectPlace)?;
        if !session.candidate_places.iter().any(|p| p.id == place_id) {
            return Err(SessionError::UnknownPlace(place_id.to_string()));
        }

        let observed = session.status;
        let mut updated = session;
        updated.selected_place_id = Some(place_id.to_string());
        updated.updated_at = chrono::Utc::now().timestamp();
        self.store.update_where(observed, &updated).await?;
        log::info!("[SESSION] Session {} selected place {}", session_id, place_id);
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<MeetSession, SessionError> {
        Ok(self.store.get_by_id(session_id).await?)
    }

    /// Watch one session for row changes pushed by the store.
    pub async fn subscribe(&self, session_id: &str) -> Subscription {
        self.store.subscribe(session_id).await
    }

    /// Shareable link for an existing session.
    pub fn session_url(&self, session: &MeetSession) -> anyhow::Result<String> {
        invite_service::build_session_url(&self.link_base, &session.id, &session.invite_token)
    }
}
