//! Ingest path: turns a raw page hit into session and event documents.

use std::sync::{Arc, OnceLock};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::agent::AgentParser;
use crate::config::PluginOptions;
use crate::error::Error;
use crate::model::{Event, EventType, Session};
use crate::store::{find_first, DocumentStore, Filter};
use crate::utm::Utm;

/// Resolves an IP address to an ISO country code. Implementations live in
/// the embedding application (edge headers, a GeoIP database); capture only
/// consumes the answer.
pub trait GeoResolver: Send + Sync {
    fn country(&self, ip: &str) -> Option<String>;
}

/// What the client is signalling with this hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSignal {
    PageView,
    /// The visitor is leaving; `duration` is seconds since the tracker
    /// started. Updates the session, creates no event.
    SessionEnd { duration: i64 },
}

/// One decoded tracking request, transport already stripped away.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub ip: String,
    pub domain: String,
    pub user_agent: Option<String>,
    pub path: String,
    pub query_params: Option<String>,
    pub referrer_url: Option<String>,
    pub utm: Utm,
    /// Country already resolved upstream (edge headers). Wins over the
    /// injected resolver.
    pub country_hint: Option<String>,
    pub signal: CaptureSignal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    EventRecorded { session_id: String },
    SessionClosed { session_id: String },
}

pub struct CaptureEngine<S> {
    store: Arc<S>,
    options: PluginOptions,
    parser: AgentParser,
    geo: Option<Arc<dyn GeoResolver>>,
}

impl<S: DocumentStore> CaptureEngine<S> {
    pub fn new(store: Arc<S>, options: PluginOptions) -> Self {
        Self {
            store,
            options,
            parser: AgentParser::new(),
            geo: None,
        }
    }

    pub fn with_geo_resolver(mut self, geo: Arc<dyn GeoResolver>) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Records one hit. Finds or creates the visitor's session keyed on
    /// `(ip_hash, domain)`, then either closes the session or appends a
    /// page view event.
    pub async fn track(
        &self,
        request: &CaptureRequest,
        now: DateTime<Utc>,
    ) -> Result<CaptureOutcome, Error> {
        let ip_hash = self.hash_ip(&request.ip);
        let session_id = self.find_or_create_session(request, &ip_hash, now).await?;

        if let CaptureSignal::SessionEnd { duration } = request.signal {
            self.store
                .update(
                    &self.options.sessions_collection(),
                    &session_id,
                    serde_json::json!({
                        "session_end": now,
                        "duration": duration,
                    }),
                )
                .await?;
            debug!(session_id, duration, "session closed");
            return Ok(CaptureOutcome::SessionClosed { session_id });
        }

        let event = Event {
            id: None,
            timestamp: now,
            session_id: session_id.clone(),
            event_type: EventType::PageView,
            path: request.path.clone(),
            query_params: request.query_params.clone(),
            referrer_url: request.referrer_url.clone(),
            event_data: None,
            created_at: None,
        };
        self.store
            .create(
                &self.options.events_collection(),
                serde_json::to_value(&event).map_err(crate::store::StoreError::from)?,
            )
            .await?;
        debug!(session_id, path = %request.path, "page view recorded");
        Ok(CaptureOutcome::EventRecorded { session_id })
    }

    async fn find_or_create_session(
        &self,
        request: &CaptureRequest,
        ip_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, Error> {
        let collection = self.options.sessions_collection();
        let filter = Filter::new()
            .equals("ip_hash", ip_hash)
            .equals("domain", request.domain.as_str());
        let existing: Option<Session> = find_first(self.store.as_ref(), &collection, &filter).await?;
        if let Some(session) = existing {
            if let Some(id) = session.id {
                return Ok(id);
            }
        }

        let country = request
            .country_hint
            .clone()
            .or_else(|| self.resolve_country(&request.ip));
        let session = Session {
            id: None,
            ip_hash: ip_hash.to_string(),
            domain: request.domain.clone(),
            session_start: now,
            session_end: None,
            duration: None,
            device_type: request
                .user_agent
                .as_deref()
                .map(|ua| self.parser.device_type(ua)),
            os: request.user_agent.as_deref().map(|ua| self.parser.os(ua)),
            browser: request
                .user_agent
                .as_deref()
                .map(|ua| self.parser.browser(ua)),
            country,
            user_agent: request.user_agent.clone(),
            referrer_url: request.referrer_url.clone(),
            utm: if request.utm.is_empty() {
                None
            } else {
                Some(request.utm.clone())
            },
        };
        let created = self
            .store
            .create(
                &collection,
                serde_json::to_value(&session).map_err(crate::store::StoreError::from)?,
            )
            .await?;
        match crate::store::doc_id(&created) {
            Some(id) => Ok(id.to_string()),
            None => {
                warn!(collection, "store returned a session without an id");
                Err(Error::Store(crate::store::StoreError::Query(
                    "created session has no id".to_string(),
                )))
            }
        }
    }

    fn resolve_country(&self, ip: &str) -> Option<String> {
        if ip.is_empty() || matches!(ip, "0.0.0.0" | "::1" | "127.0.0.1") {
            return None;
        }
        self.geo.as_ref().and_then(|geo| geo.country(ip))
    }

    /// Visitors are never stored by raw address. The optional salt keeps the
    /// hash stable across processes while detaching it from the bare IP.
    fn hash_ip(&self, ip: &str) -> String {
        let mut hasher = Sha256::new();
        if let Some(salt) = &self.options.ip_hash_salt {
            hasher.update(salt.as_bytes());
        }
        hasher.update(ip.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// 1x1 transparent GIF, the universal tracking-pixel response body.
pub fn tracking_pixel() -> &'static [u8] {
    static PIXEL: OnceLock<Vec<u8>> = OnceLock::new();
    PIXEL.get_or_init(|| {
        BASE64
            .decode("R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7")
            .unwrap()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{find_docs, FindOptions};

    const UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn engine() -> CaptureEngine<MemoryStore> {
        CaptureEngine::new(Arc::new(MemoryStore::new()), PluginOptions::default())
    }

    fn page_view(ip: &str, path: &str) -> CaptureRequest {
        CaptureRequest {
            ip: ip.to_string(),
            domain: "example.com".to_string(),
            user_agent: Some(UA.to_string()),
            path: path.to_string(),
            query_params: None,
            referrer_url: None,
            utm: Utm::default(),
            country_hint: None,
            signal: CaptureSignal::PageView,
        }
    }

    #[tokio::test]
    async fn page_view_creates_session_and_event() {
        let engine = engine();
        let outcome = engine.track(&page_view("1.2.3.4", "/home"), Utc::now()).await.unwrap();
        let CaptureOutcome::EventRecorded { session_id } = outcome else {
            panic!("expected an event");
        };

        let sessions: Vec<Session> = find_docs(
            engine.store.as_ref(),
            "analytics-sessions",
            &Filter::new(),
            &FindOptions::all(),
        )
        .await
        .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].browser.as_deref(), Some("Chrome"));
        assert_eq!(sessions[0].os.as_deref(), Some("macOS"));
        assert_ne!(sessions[0].ip_hash, "1.2.3.4");

        let events: Vec<Event> = find_docs(
            engine.store.as_ref(),
            "analytics-events",
            &Filter::new(),
            &FindOptions::all(),
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, session_id);
        assert_eq!(events[0].path, "/home");
    }

    #[tokio::test]
    async fn repeat_hits_reuse_the_session() {
        let engine = engine();
        let first = engine.track(&page_view("1.2.3.4", "/a"), Utc::now()).await.unwrap();
        let second = engine.track(&page_view("1.2.3.4", "/b"), Utc::now()).await.unwrap();
        let (
            CaptureOutcome::EventRecorded { session_id: a },
            CaptureOutcome::EventRecorded { session_id: b },
        ) = (first, second)
        else {
            panic!("expected events");
        };
        assert_eq!(a, b);

        let result = engine
            .store
            .find("analytics-sessions", &Filter::new(), &FindOptions::all())
            .await
            .unwrap();
        assert_eq!(result.total_docs, 1);
    }

    #[tokio::test]
    async fn distinct_visitors_get_distinct_sessions() {
        let engine = engine();
        engine.track(&page_view("1.2.3.4", "/"), Utc::now()).await.unwrap();
        engine.track(&page_view("5.6.7.8", "/"), Utc::now()).await.unwrap();
        let result = engine
            .store
            .find("analytics-sessions", &Filter::new(), &FindOptions::all())
            .await
            .unwrap();
        assert_eq!(result.total_docs, 2);
    }

    #[tokio::test]
    async fn session_end_updates_without_an_event() {
        let engine = engine();
        engine.track(&page_view("1.2.3.4", "/"), Utc::now()).await.unwrap();

        let mut end = page_view("1.2.3.4", "/");
        end.signal = CaptureSignal::SessionEnd { duration: 95 };
        let outcome = engine.track(&end, Utc::now()).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::SessionClosed { .. }));

        let sessions: Vec<Session> = find_docs(
            engine.store.as_ref(),
            "analytics-sessions",
            &Filter::new(),
            &FindOptions::all(),
        )
        .await
        .unwrap();
        assert_eq!(sessions[0].duration, Some(95));
        assert!(sessions[0].session_end.is_some());

        let events = engine
            .store
            .find("analytics-events", &Filter::new(), &FindOptions::all())
            .await
            .unwrap();
        assert_eq!(events.total_docs, 1);
    }

    #[tokio::test]
    async fn utm_lands_on_the_session() {
        let engine = engine();
        let mut request = page_view("1.2.3.4", "/");
        request.utm = Utm {
            source: Some("twitter".into()),
            campaign: Some("launch".into()),
            ..Utm::default()
        };
        engine.track(&request, Utc::now()).await.unwrap();
        let sessions: Vec<Session> = find_docs(
            engine.store.as_ref(),
            "analytics-sessions",
            &Filter::new(),
            &FindOptions::all(),
        )
        .await
        .unwrap();
        let utm = sessions[0].utm.as_ref().unwrap();
        assert_eq!(utm.source.as_deref(), Some("twitter"));
    }

    #[tokio::test]
    async fn loopback_addresses_skip_geo_resolution() {
        struct Fixed;
        impl GeoResolver for Fixed {
            fn country(&self, _ip: &str) -> Option<String> {
                Some("PL".to_string())
            }
        }
        let engine = engine().with_geo_resolver(Arc::new(Fixed));
        engine.track(&page_view("127.0.0.1", "/"), Utc::now()).await.unwrap();
        engine.track(&page_view("9.9.9.9", "/"), Utc::now()).await.unwrap();

        let sessions: Vec<Session> = find_docs(
            engine.store.as_ref(),
            "analytics-sessions",
            &Filter::new(),
            &FindOptions::all(),
        )
        .await
        .unwrap();
        assert_eq!(sessions[0].country, None);
        assert_eq!(sessions[1].country.as_deref(), Some("PL"));
    }

    #[test]
    fn pixel_is_a_gif() {
        let pixel = tracking_pixel();
        assert_eq!(&pixel[..6], b"GIF89a");
    }

    #[test]
    fn salt_changes_the_hash() {
        let plain = engine();
        let salted = CaptureEngine::new(
            Arc::new(MemoryStore::new()),
            PluginOptions {
                ip_hash_salt: Some("pepper".to_string()),
                ..PluginOptions::default()
            },
        );
        assert_ne!(plain.hash_ip("1.2.3.4"), salted.hash_ip("1.2.3.4"));
        assert_eq!(plain.hash_ip("1.2.3.4"), plain.hash_ip("1.2.3.4"));
    }
}
