//! In-memory storage implementation.
//!
//! Each operation takes the single state lock once, which makes every
//! operation atomic with respect to every other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use ezri_core::{
    ActivityEvent, CreditBalance, Deduction, Profile, Session, SessionId, SessionMessage,
    SessionStatus, Subscription, SubscriptionId, UserId,
};

use crate::error::{Result, StoreError};
use crate::{Provisioned, SessionCompletion, Store};

#[derive(Debug, Default)]
struct State {
    profiles: HashMap<UserId, Profile>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    sessions: HashMap<SessionId, Session>,
    messages: Vec<SessionMessage>,
    activity: Vec<ActivityEvent>,
}

impl State {
    fn profile_mut(&mut self, user_id: &UserId) -> Result<&mut Profile> {
        self.profiles
            .get_mut(user_id)
            .ok_or_else(|| StoreError::profile_not_found(user_id))
    }

    fn owned_session_mut(&mut self, user_id: &UserId, session_id: &SessionId) -> Option<&mut Session> {
        self.sessions
            .get_mut(session_id)
            .filter(|s| s.user_id == *user_id)
    }

    fn user_subscriptions(&self, user_id: &UserId) -> Vec<Subscription> {
        let mut subs: Vec<_> = self
            .subscriptions
            .values()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        subs
    }
}

/// Mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Profile Operations
    // =========================================================================

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>> {
        Ok(self.state.lock().await.profiles.get(user_id).cloned())
    }

    async fn provision_profile(&self, profile: &Profile, trial: &Subscription) -> Result<Provisioned> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.profiles.get(&profile.id) {
            return Ok(Provisioned {
                profile: existing.clone(),
                created: false,
            });
        }
        state.profiles.insert(profile.id, profile.clone());
        state.subscriptions.insert(trial.id, trial.clone());
        Ok(Provisioned {
            profile: profile.clone(),
            created: true,
        })
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state.profile_mut(&profile.id)?;
        stored.email.clone_from(&profile.email);
        stored.full_name.clone_from(&profile.full_name);
        stored.role = profile.role;
        stored.permissions.clone_from(&profile.permissions);
        stored.onboarding_completed = profile.onboarding_completed;
        stored.updated_at = profile.updated_at;
        Ok(())
    }

    async fn delete_profile(&self, user_id: &UserId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.profiles.remove(user_id).is_none() {
            return Err(StoreError::profile_not_found(user_id));
        }
        state.subscriptions.retain(|_, s| s.user_id != *user_id);
        let owned: Vec<SessionId> = state
            .sessions
            .values()
            .filter(|s| s.user_id == *user_id)
            .map(|s| s.id)
            .collect();
        state.sessions.retain(|_, s| s.user_id != *user_id);
        state.messages.retain(|m| !owned.contains(&m.session_id));
        state.activity.retain(|a| a.user_id != *user_id);
        Ok(())
    }

    async fn list_profiles(&self, limit: usize, offset: usize) -> Result<Vec<Profile>> {
        let state = self.state.lock().await;
        let mut profiles: Vec<_> = state.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(profiles.into_iter().skip(offset).take(limit).collect())
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn deduct_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Deduction> {
        let mut state = self.state.lock().await;
        let profile = state.profile_mut(user_id)?;
        let deduction = profile.balance().deduct(minutes);
        profile.credits = deduction.balance.credits;
        profile.purchased_credits = deduction.balance.purchased_credits;
        profile.updated_at = now;
        Ok(deduction)
    }

    async fn set_credits(
        &self,
        user_id: &UserId,
        credits: i64,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance> {
        let mut state = self.state.lock().await;
        let profile = state.profile_mut(user_id)?;
        profile.credits = credits.max(0);
        profile.updated_at = now;
        Ok(profile.balance())
    }

    async fn add_purchased_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance> {
        let mut state = self.state.lock().await;
        let profile = state.profile_mut(user_id)?;
        profile.purchased_credits = (profile.purchased_credits + minutes).max(0);
        profile.updated_at = now;
        Ok(profile.balance())
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    async fn active_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .user_subscriptions(user_id)
            .into_iter()
            .find(Subscription::is_active))
    }

    async fn latest_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state.user_subscriptions(user_id).into_iter().next())
    }

    async fn find_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.provider_subscription_id.as_deref() == Some(provider_subscription_id))
            .cloned())
    }

    async fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.profiles.contains_key(&subscription.user_id) {
            return Err(StoreError::profile_not_found(subscription.user_id));
        }
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        Ok(self.state.lock().await.user_subscriptions(user_id))
    }

    // =========================================================================
    // Session Operations
    // =========================================================================

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.profiles.contains_key(&session.user_id) {
            return Err(StoreError::profile_not_found(session.user_id));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(session_id)
            .filter(|s| s.user_id == *user_id)
            .cloned())
    }

    async fn list_sessions(
        &self,
        user_id: &UserId,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.user_id == *user_id)
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn complete_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        completion: SessionCompletion<'_>,
    ) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        let Some(session) = state.owned_session_mut(user_id, session_id) else {
            return Ok(None);
        };
        if session.is_completed() {
            return Ok(None);
        }
        session.complete(
            completion.ended_at,
            completion.duration_minutes,
            completion.recording_url.map(str::to_string),
        );
        Ok(Some(session.clone()))
    }

    async fn toggle_session_favorite(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        Ok(state.owned_session_mut(user_id, session_id).map(|session| {
            session.is_favorite = !session.is_favorite;
            session.updated_at = now;
            session.clone()
        }))
    }

    async fn count_completed_sessions(&self, user_id: &UserId) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .sessions
            .values()
            .filter(|s| s.user_id == *user_id && s.is_completed())
            .count();
        i64::try_from(count).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    // =========================================================================
    // Message Operations
    // =========================================================================

    async fn append_message(
        &self,
        message: &SessionMessage,
        activity: &ActivityEvent,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&message.session_id) {
            return Err(StoreError::NotFound {
                entity: "session",
                id: message.session_id.to_string(),
            });
        }
        state.messages.push(message.clone());
        state.activity.push(activity.clone());
        Ok(())
    }

    async fn append_messages(&self, messages: &[SessionMessage]) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(missing) = messages
            .iter()
            .find(|m| !state.sessions.contains_key(&m.session_id))
        {
            return Err(StoreError::NotFound {
                entity: "session",
                id: missing.session_id.to_string(),
            });
        }
        state.messages.extend_from_slice(messages);
        Ok(())
    }

    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<SessionMessage>> {
        let state = self.state.lock().await;
        let mut messages: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.session_id == *session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn list_activity(&self, user_id: &UserId, limit: usize) -> Result<Vec<ActivityEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .activity
            .iter()
            .filter(|a| a.user_id == *user_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        Ok(events)
    }
}
