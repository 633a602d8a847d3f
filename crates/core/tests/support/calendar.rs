use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calsync_core::CalendarProvider;
use calsync_domain::{
    Account, CalsyncError, ChangeSet, EventStatus, ExternalEvent, Result as DomainResult,
    SyncMode, SyncWindow, WatchChannel, WatchRequest,
};
use chrono::{Duration, Utc};

type ListScript = DomainResult<(Vec<ExternalEvent>, Option<String>)>;

#[derive(Default)]
struct ProviderState {
    list_script: VecDeque<ListScript>,
    list_calls: Vec<SyncMode>,
    events_by_id: HashMap<String, ExternalEvent>,
    get_calls: Vec<String>,
    statuses: HashMap<String, EventStatus>,
    status_failure: Option<CalsyncError>,
    status_calls: usize,
    create_failures: VecDeque<CalsyncError>,
    created: Vec<WatchRequest>,
    stopped: Vec<WatchChannel>,
}

/// Scriptable provider double.
///
/// `list_events` replays queued responses in order and falls back to an
/// empty page with a fresh token. `get_event_by_id` answers from the seeded
/// events and returns `None` for anything else.
#[derive(Default, Clone)]
pub struct MockCalendarProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl MockCalendarProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_list(&self, events: Vec<ExternalEvent>, next_token: &str) {
        let scripted = Ok((events, Some(next_token.to_string())));
        self.state.lock().unwrap().list_script.push_back(scripted);
    }

    pub fn push_list_error(&self, error: CalsyncError) {
        self.state.lock().unwrap().list_script.push_back(Err(error));
    }

    pub fn seed_event(&self, event: ExternalEvent) {
        self.state.lock().unwrap().events_by_id.insert(event.id.clone(), event);
    }

    pub fn set_statuses(&self, statuses: &[(&str, EventStatus)]) {
        self.state.lock().unwrap().statuses =
            statuses.iter().map(|(id, status)| (id.to_string(), *status)).collect();
    }

    /// Every status listing fails with `error` until cleared.
    pub fn fail_status_listing(&self, error: CalsyncError) {
        self.state.lock().unwrap().status_failure = Some(error);
    }

    pub fn fail_channel_creation(&self, times: usize, error: CalsyncError) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..times {
            state.create_failures.push_back(error.clone());
        }
    }

    pub fn list_calls(&self) -> Vec<SyncMode> {
        self.state.lock().unwrap().list_calls.clone()
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().get_calls.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().unwrap().status_calls
    }

    pub fn created_channels(&self) -> Vec<WatchRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn stopped_channels(&self) -> Vec<WatchChannel> {
        self.state.lock().unwrap().stopped.clone()
    }
}

#[async_trait]
impl CalendarProvider for MockCalendarProvider {
    async fn list_events(&self, _account: &Account, mode: &SyncMode) -> DomainResult<ChangeSet> {
        let mut state = self.state.lock().unwrap();
        state.list_calls.push(mode.clone());
        let call = state.list_calls.len();
        let (events, next_sync_token) = match state.list_script.pop_front() {
            Some(scripted) => scripted?,
            None => (Vec::new(), Some(format!("token-{call}"))),
        };
        Ok(ChangeSet { events, next_sync_token, mode: mode.clone() })
    }

    async fn get_event_by_id(
        &self,
        _account: &Account,
        external_id: &str,
    ) -> DomainResult<Option<ExternalEvent>> {
        let mut state = self.state.lock().unwrap();
        state.get_calls.push(external_id.to_string());
        Ok(state.events_by_id.get(external_id).cloned())
    }

    async fn list_event_statuses(
        &self,
        _account: &Account,
        _window: &SyncWindow,
    ) -> DomainResult<HashMap<String, EventStatus>> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;
        if let Some(error) = &state.status_failure {
            return Err(error.clone());
        }
        Ok(state.statuses.clone())
    }

    async fn create_watch_channel(
        &self,
        _account: &Account,
        request: &WatchRequest,
    ) -> DomainResult<WatchChannel> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        state.created.push(request.clone());
        Ok(WatchChannel {
            channel_id: request.channel_id.clone(),
            resource_id: format!("resource-{}", state.created.len()),
            expires_at: Utc::now() + Duration::seconds(request.ttl_secs),
        })
    }

    async fn stop_watch_channel(
        &self,
        _account: &Account,
        channel: &WatchChannel,
    ) -> DomainResult<()> {
        self.state.lock().unwrap().stopped.push(channel.clone());
        Ok(())
    }
}
