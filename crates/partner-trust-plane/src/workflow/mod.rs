//! API-key request workflow
//!
//! Stores API-key requests and drives them through the lifecycle defined in
//! [`partner_trust_core::lifecycle`]. Every mutation is a compare-and-swap on
//! the request's current state under a single write lock, so two racing
//! decisions on the same request cannot both succeed and key material is
//! issued at most once per request.

pub mod issuer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use partner_trust_core::{
    transition, Caller, Effect, RequestEvent, RequestState, WorkflowError,
};

use crate::events::{EventModel, EventSink, Topic};

pub use issuer::{ApiKeyIssuer, ApiKeyMaterial, IssuedKey, KeyMaterialRef};

/// A partner's request for an API key under a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyRequest {
    pub request_id: String,
    pub partner_id: String,
    pub policy_id: String,
    pub use_case_description: String,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub decision_reason: Option<String>,
    /// Set exactly while the request is `KeyGenerated`
    pub key_material_ref: Option<KeyMaterialRef>,
}

#[derive(Debug, Default)]
struct WorkflowState {
    requests: HashMap<String, ApiKeyRequest>,
    /// (partner, policy) -> request id of the open request for that pair
    open_pairs: HashMap<(String, String), String>,
    /// partner -> request ids in submission order
    by_partner: HashMap<String, Vec<String>>,
}

/// Request store and state machine driver
#[derive(Debug)]
pub struct ApiKeyRequestWorkflow {
    state: RwLock<WorkflowState>,
    issuer: ApiKeyIssuer,
    events: Arc<dyn EventSink>,
}

impl ApiKeyRequestWorkflow {
    pub fn new(issuer: ApiKeyIssuer, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: RwLock::new(WorkflowState::default()),
            issuer,
            events,
        }
    }

    pub fn issuer(&self) -> &ApiKeyIssuer {
        &self.issuer
    }

    /// Create a request in `Submitted`
    ///
    /// Fails with `DuplicateRequest` while another request for the same
    /// partner and policy is still open.
    pub fn submit(
        &self,
        partner_id: &str,
        policy_id: &str,
        use_case_description: &str,
    ) -> Result<ApiKeyRequest, WorkflowError> {
        let pair = (partner_id.to_string(), policy_id.to_string());
        let mut state = self.state.write().unwrap();

        if let Some(existing) = state.open_pairs.get(&pair) {
            warn!(
                partner_id = %partner_id,
                policy_id = %policy_id,
                existing = %existing,
                "Rejected duplicate API key request"
            );
            return Err(WorkflowError::DuplicateRequest {
                partner_id: partner_id.to_string(),
                policy_id: policy_id.to_string(),
                existing: existing.clone(),
            });
        }

        let now = Utc::now();
        let request = ApiKeyRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            partner_id: partner_id.to_string(),
            policy_id: policy_id.to_string(),
            use_case_description: use_case_description.to_string(),
            state: RequestState::Submitted,
            created_at: now,
            updated_at: now,
            decided_at: None,
            decided_by: None,
            decision_reason: None,
            key_material_ref: None,
        };

        let id = request.request_id.clone();
        state.open_pairs.insert(pair, id.clone());
        state
            .by_partner
            .entry(partner_id.to_string())
            .or_default()
            .push(id.clone());
        state.requests.insert(id.clone(), request.clone());
        drop(state);

        info!(request_id = %id, partner_id = %partner_id, policy_id = %policy_id, "Submitted API key request");
        self.events.publish(EventModel::new(
            Topic::ApikeyRequestSubmitted,
            serde_json::json!({
                "request_id": id,
                "partner_id": partner_id,
                "policy_id": policy_id,
            }),
        ));

        Ok(request)
    }

    /// Approve a submitted request
    pub fn approve(&self, request_id: &str, caller: &Caller) -> Result<ApiKeyRequest, WorkflowError> {
        require_approver(caller, "approve API key requests")?;
        let (request, _) = self.apply(request_id, RequestEvent::Approve, Some(caller))?;
        Ok(request)
    }

    /// Reject a submitted request
    pub fn reject(&self, request_id: &str, caller: &Caller, reason: &str) -> Result<ApiKeyRequest, WorkflowError> {
        require_approver(caller, "reject API key requests")?;
        let event = RequestEvent::Reject {
            reason: reason.to_string(),
        };
        let (request, _) = self.apply(request_id, event, Some(caller))?;
        Ok(request)
    }

    /// Generate the key for an approved request
    ///
    /// The first call moves the request to `KeyGenerated` and returns the raw
    /// key. Later calls return the same reference without the raw key.
    /// Allowed for approvers and for the partner owning the request.
    pub fn generate_key(&self, request_id: &str, caller: &Caller) -> Result<IssuedKey, WorkflowError> {
        if !caller.is_approver() {
            let owner = self.retrieve(request_id)?.partner_id;
            if !caller.acts_for(&owner) {
                return Err(not_authorized(caller, "generate this API key"));
            }
        }

        let (request, raw_key) = self.apply(request_id, RequestEvent::GenerateKey, None)?;
        let key_ref = request
            .key_material_ref
            .ok_or_else(|| WorkflowError::KeyUnavailable {
                request_id: request_id.to_string(),
                state: request.state,
            })?;

        Ok(IssuedKey { key_ref, raw_key })
    }

    /// Revoke a rejected or key-holding request; admin only
    pub fn revoke(&self, request_id: &str, caller: &Caller) -> Result<ApiKeyRequest, WorkflowError> {
        if !caller.is_admin() {
            return Err(not_authorized(caller, "revoke API key requests"));
        }
        let (request, _) = self.apply(request_id, RequestEvent::Revoke, Some(caller))?;
        Ok(request)
    }

    /// Current record of a request
    pub fn retrieve(&self, request_id: &str) -> Result<ApiKeyRequest, WorkflowError> {
        let state = self.state.read().unwrap();
        state
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| WorkflowError::RequestNotFound {
                request_id: request_id.to_string(),
            })
    }

    /// Requests submitted by a partner, oldest first
    pub fn list_by_partner(&self, partner_id: &str) -> PartnerRequests<'_> {
        let state = self.state.read().unwrap();
        let mut ids: Vec<(DateTime<Utc>, String)> = state
            .by_partner
            .get(partner_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.requests.get(id).map(|r| (r.created_at, id.clone())))
                    .collect()
            })
            .unwrap_or_default();
        // Stable: equal timestamps keep submission order
        ids.sort_by_key(|(created_at, _)| *created_at);

        PartnerRequests {
            workflow: self,
            ids: ids.into_iter().map(|(_, id)| id).collect(),
        }
    }

    /// Key material for a request, for the owning partner only
    pub fn download(&self, request_id: &str, caller: &Caller) -> Result<ApiKeyMaterial, WorkflowError> {
        let request = self.retrieve(request_id)?;
        if !caller.acts_for(&request.partner_id) {
            warn!(
                request_id = %request_id,
                caller = %caller.id,
                "SECURITY: Rejected API key download by non-owner"
            );
            return Err(not_authorized(caller, "download this API key"));
        }

        let unavailable = || WorkflowError::KeyUnavailable {
            request_id: request_id.to_string(),
            state: request.state,
        };
        let key_ref = request.key_material_ref.as_ref().ok_or_else(unavailable)?;
        self.issuer.material(key_ref).ok_or_else(unavailable)
    }

    /// Apply an event under the write lock
    ///
    /// Returns the updated record and, when this call issued the key, the raw
    /// key material.
    fn apply(
        &self,
        request_id: &str,
        event: RequestEvent,
        caller: Option<&Caller>,
    ) -> Result<(ApiKeyRequest, Option<ApiKeyMaterial>), WorkflowError> {
        let mut state = self.state.write().unwrap();
        let request = state
            .requests
            .get_mut(request_id)
            .ok_or_else(|| WorkflowError::RequestNotFound {
                request_id: request_id.to_string(),
            })?;

        let from = request.state;
        let step = transition(from, &event).map_err(|invalid| {
            warn!(
                request_id = %request_id,
                from = %invalid.from,
                event = %invalid.event,
                "Rejected invalid state transition"
            );
            WorkflowError::InvalidStateTransition {
                request_id: request_id.to_string(),
                from: invalid.from,
                event: invalid.event,
            }
        })?;

        // Retried generate_key or revoke: nothing changes
        if step.next == from && matches!(step.effect, Effect::None | Effect::ReuseExistingKey) {
            return Ok((request.clone(), None));
        }

        let now = Utc::now();
        let mut raw_key = None;
        match step.effect {
            Effect::IssueKey => {
                let issued = self.issuer.issue(request);
                request.key_material_ref = Some(issued.key_ref);
                raw_key = issued.raw_key;
            }
            Effect::InvalidateKey => {
                if let Some(key_ref) = request.key_material_ref.take() {
                    self.issuer.invalidate(&key_ref);
                }
            }
            Effect::None | Effect::ReuseExistingKey => {}
        }

        request.state = step.next;
        request.updated_at = now;
        match &event {
            RequestEvent::Approve => {
                request.decided_at = Some(now);
                request.decided_by = caller.map(|c| c.id.clone());
            }
            RequestEvent::Reject { reason } => {
                request.decided_at = Some(now);
                request.decided_by = caller.map(|c| c.id.clone());
                request.decision_reason = Some(reason.clone());
            }
            RequestEvent::GenerateKey | RequestEvent::Revoke => {}
        }

        let updated = request.clone();
        if !updated.state.is_open() {
            let pair = (updated.partner_id.clone(), updated.policy_id.clone());
            if state.open_pairs.get(&pair).map(String::as_str) == Some(request_id) {
                state.open_pairs.remove(&pair);
            }
        }
        drop(state);

        info!(
            request_id = %request_id,
            from = %from,
            to = %updated.state,
            event = %event,
            "API key request transitioned"
        );
        self.publish_transition(&updated, &event, step.effect);

        Ok((updated, raw_key))
    }

    fn publish_transition(&self, request: &ApiKeyRequest, event: &RequestEvent, effect: Effect) {
        let topic = match event {
            RequestEvent::Approve | RequestEvent::Reject { .. } => Topic::ApikeyRequestDecided,
            RequestEvent::GenerateKey => Topic::ApikeyGenerated,
            RequestEvent::Revoke => Topic::ApikeyRevoked,
        };
        self.events.publish(EventModel::new(
            topic,
            serde_json::json!({
                "request_id": request.request_id,
                "partner_id": request.partner_id,
                "policy_id": request.policy_id,
                "state": request.state,
                "key_invalidated": effect == Effect::InvalidateKey,
            }),
        ));
    }
}

/// Lazy view over one partner's requests
///
/// Holds only request ids; each record is read when the iterator reaches
/// it, so iterating shows the current state. Call [`iter`](Self::iter) again
/// to restart.
#[derive(Debug)]
pub struct PartnerRequests<'a> {
    workflow: &'a ApiKeyRequestWorkflow,
    ids: Vec<String>,
}

impl<'a> PartnerRequests<'a> {
    pub fn iter(&self) -> impl Iterator<Item = ApiKeyRequest> + '_ {
        self.ids
            .iter()
            .filter_map(move |id| self.workflow.retrieve(id).ok())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn require_approver(caller: &Caller, action: &str) -> Result<(), WorkflowError> {
    if caller.is_approver() {
        Ok(())
    } else {
        Err(not_authorized(caller, action))
    }
}

fn not_authorized(caller: &Caller, action: &str) -> WorkflowError {
    WorkflowError::NotAuthorized {
        caller: caller.id.clone(),
        action: action.to_string(),
    }
}
