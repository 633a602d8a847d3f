//! Google Calendar provider implementation

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::CalendarProvider;
use calsync_domain::constants::{PROVIDER_MAX_RESULTS, RECONCILE_MAX_PAGES};
use calsync_domain::{
    Account, CalsyncError, ChangeSet, EventStatus, ExternalEvent, ProviderConfig, Result,
    SyncMode, SyncWindow, WatchChannel, WatchRequest,
};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::http::HttpClient;
use crate::integrations::calendar::types::{
    into_external_event, EventsPage, StatusPage, StopBody, WatchBody, WatchParams, WatchResponse,
};

/// Google Calendar v3 client for one configured calendar.
pub struct GoogleCalendarProvider {
    http: HttpClient,
    base_url: Url,
    calendar_id: String,
}

impl GoogleCalendarProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url).map_err(|e| {
            CalsyncError::Config(format!("invalid provider base URL {}: {e}", config.api_base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CalsyncError::Config(format!(
                "provider base URL cannot carry a path: {}",
                config.api_base_url
            )));
        }
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("calsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, base_url, calendar_id: config.calendar_id.clone() })
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn events_url(&self) -> Url {
        self.endpoint(&["calendars", &self.calendar_id, "events"])
    }

    async fn fetch_page(
        &self,
        account: &Account,
        mode: &SyncMode,
        page_token: Option<&str>,
    ) -> Result<EventsPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("maxResults", PROVIDER_MAX_RESULTS.to_string()),
            ("singleEvents", "true".to_string()),
        ];
        match mode {
            SyncMode::Incremental { token } => query.push(("syncToken", token.clone())),
            SyncMode::Full { window } => {
                query.push(("timeMin", rfc3339(window.start)));
                query.push(("timeMax", rfc3339(window.end)));
            }
        }
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token.to_string()));
        }

        let request = self
            .http
            .request(Method::GET, self.events_url())
            .bearer_auth(&account.access_token)
            .query(&query);
        self.http.send_json(request).await
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    #[instrument(skip(self, account, mode), fields(
        account_id = %account.id,
        full = mode.is_full()
    ))]
    async fn list_events(&self, account: &Account, mode: &SyncMode) -> Result<ChangeSet> {
        let mut events = Vec::new();
        let mut skipped = 0usize;
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        let next_sync_token = loop {
            let page = self.fetch_page(account, mode, page_token.as_deref()).await?;
            pages += 1;
            for raw in page.items {
                match into_external_event(raw) {
                    Ok(event) => events.push(event),
                    Err(err) => {
                        skipped += 1;
                        warn!(error = %err, "malformed provider item skipped");
                    }
                }
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break page.next_sync_token,
            }
        };

        info!(events = events.len(), skipped, pages, "provider events listed");
        Ok(ChangeSet { events, next_sync_token, mode: mode.clone() })
    }

    #[instrument(skip(self, account), fields(account_id = %account.id))]
    async fn get_event_by_id(
        &self,
        account: &Account,
        external_id: &str,
    ) -> Result<Option<ExternalEvent>> {
        let url = self.endpoint(&["calendars", &self.calendar_id, "events", external_id]);
        let request = self.http.request(Method::GET, url).bearer_auth(&account.access_token);

        match self.http.send_json::<serde_json::Value>(request).await {
            Ok(raw) => into_external_event(raw).map(Some).map_err(|e| {
                CalsyncError::InvalidInput(format!("malformed event {external_id}: {e}"))
            }),
            // deleted events answer 410 on direct lookup
            Err(err) if err.is_not_found() || err.is_token_invalid() => {
                debug!("event not found on provider");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, account), fields(account_id = %account.id))]
    async fn list_event_statuses(
        &self,
        account: &Account,
        window: &SyncWindow,
    ) -> Result<HashMap<String, EventStatus>> {
        let mut statuses = HashMap::new();
        let mut page_token: Option<String> = None;

        for page_number in 1..=RECONCILE_MAX_PAGES {
            let mut query: Vec<(&str, String)> = vec![
                ("maxResults", PROVIDER_MAX_RESULTS.to_string()),
                ("singleEvents", "true".to_string()),
                ("showDeleted", "true".to_string()),
                ("timeMin", rfc3339(window.start)),
                ("timeMax", rfc3339(window.end)),
                ("fields", "items(id,status),nextPageToken".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let request = self
                .http
                .request(Method::GET, self.events_url())
                .bearer_auth(&account.access_token)
                .query(&query);
            let page: StatusPage = self.http.send_json(request).await?;

            for item in page.items {
                statuses.insert(item.id, EventStatus::from_provider(item.status.as_deref()));
            }
            match page.next_page_token {
                Some(next) if page_number < RECONCILE_MAX_PAGES => page_token = Some(next),
                Some(_) => {
                    warn!(pages = page_number, "status listing truncated at page cap");
                    return Err(CalsyncError::InvalidInput(format!(
                        "status listing exceeds {RECONCILE_MAX_PAGES} pages"
                    )));
                }
                None => break,
            }
        }

        debug!(events = statuses.len(), "provider statuses listed");
        Ok(statuses)
    }

    #[instrument(skip(self, account, request), fields(
        account_id = %account.id,
        channel_id = %request.channel_id
    ))]
    async fn create_watch_channel(
        &self,
        account: &Account,
        request: &WatchRequest,
    ) -> Result<WatchChannel> {
        let url = self.endpoint(&["calendars", &request.resource, "events", "watch"]);
        let body = WatchBody {
            id: &request.channel_id,
            kind: "web_hook",
            address: &request.callback_url,
            token: &request.token,
            params: WatchParams { ttl: request.ttl_secs.to_string() },
        };
        let builder =
            self.http.request(Method::POST, url).bearer_auth(&account.access_token).json(&body);
        let response: WatchResponse = self.http.send_json(builder).await?;

        let fallback = Utc::now() + chrono::Duration::seconds(request.ttl_secs);
        Ok(response.into_channel(fallback))
    }

    #[instrument(skip(self, account, channel), fields(
        account_id = %account.id,
        channel_id = %channel.channel_id
    ))]
    async fn stop_watch_channel(&self, account: &Account, channel: &WatchChannel) -> Result<()> {
        let body = StopBody { id: &channel.channel_id, resource_id: &channel.resource_id };
        let builder = self
            .http
            .request(Method::POST, self.endpoint(&["channels", "stop"]))
            .bearer_auth(&account.access_token)
            .json(&body);
        match self.http.send(builder).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!("channel already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
