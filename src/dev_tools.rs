//! Synthetic traffic for development dashboards. Not wired into anything
//! by default; embedders opt in from their own dev entrypoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::capture::{CaptureEngine, CaptureRequest, CaptureSignal};
use crate::error::Error;
use crate::store::DocumentStore;
use crate::utm::Utm;

const SAMPLE_PAGES: &[&str] = &[
    "/",
    "/products",
    "/about",
    "/contact",
    "/blog",
    "/pricing",
    "/features",
];

const SAMPLE_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 11; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.120 Mobile Safari/537.36",
];

const SAMPLE_REFERRERS: &[Option<&str>] = &[
    Some("https://google.com"),
    Some("https://facebook.com"),
    Some("https://twitter.com"),
    Some("https://linkedin.com"),
    None, // direct traffic
];

const SAMPLE_IPS: &[&str] = &[
    "8.8.8.8",
    "178.79.163.1",
    "35.158.210.2",
    "52.69.10.3",
    "13.54.20.4",
    "35.182.30.5",
    "156.146.40.6",
];

const SAMPLE_UTM_SOURCES: &[&str] = &["newsletter", "twitter", "producthunt"];

pub struct EventGenerator<S> {
    engine: Arc<CaptureEngine<S>>,
    domain: String,
}

impl<S: DocumentStore> EventGenerator<S> {
    pub fn new(engine: Arc<CaptureEngine<S>>, domain: String) -> Self {
        Self { engine, domain }
    }

    fn random_request(&self, rng: &mut StdRng) -> CaptureRequest {
        let utm = if rng.gen_bool(0.3) {
            Utm {
                source: SAMPLE_UTM_SOURCES
                    .choose(rng)
                    .map(|source| source.to_string()),
                campaign: Some("dev-seed".to_string()),
                ..Utm::default()
            }
        } else {
            Utm::default()
        };
        CaptureRequest {
            ip: SAMPLE_IPS.choose(rng).unwrap().to_string(),
            domain: self.domain.clone(),
            user_agent: Some(SAMPLE_AGENTS.choose(rng).unwrap().to_string()),
            path: SAMPLE_PAGES.choose(rng).unwrap().to_string(),
            query_params: None,
            referrer_url: SAMPLE_REFERRERS
                .choose(rng)
                .copied()
                .flatten()
                .map(str::to_string),
            utm,
            country_hint: None,
            signal: CaptureSignal::PageView,
        }
    }

    /// Seeds a fixed number of page views at once. Handy for tests and for
    /// populating a fresh store before opening the dashboard.
    pub async fn generate_batch(&self, count: usize) -> Result<(), Error> {
        let mut rng = StdRng::from_entropy();
        for _ in 0..count {
            let request = self.random_request(&mut rng);
            self.engine.track(&request, Utc::now()).await?;
        }
        info!(count, "seeded synthetic page views");
        Ok(())
    }

    /// Emits page views forever with a random 2-10s gap between them.
    pub async fn start_generation(&self) {
        info!("starting synthetic event generation");
        let mut rng = StdRng::from_entropy();
        loop {
            let request = self.random_request(&mut rng);
            if let Err(err) = self.engine.track(&request, Utc::now()).await {
                warn!(error = %err, "failed to record synthetic event");
            }
            let delay = rng.gen_range(2..10);
            sleep(Duration::from_secs(delay)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginOptions;
    use crate::store::memory::MemoryStore;
    use crate::store::{Filter, FindOptions};

    #[tokio::test]
    async fn batch_generation_fills_both_collections() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(CaptureEngine::new(store.clone(), PluginOptions::default()));
        let generator = EventGenerator::new(engine, "dev.example".to_string());

        generator.generate_batch(20).await.unwrap();

        let events = store
            .find("analytics-events", &Filter::new(), &FindOptions::all())
            .await
            .unwrap();
        assert_eq!(events.total_docs, 20);

        let sessions = store
            .find("analytics-sessions", &Filter::new(), &FindOptions::all())
            .await
            .unwrap();
        assert!(sessions.total_docs >= 1);
        assert!(sessions.total_docs <= SAMPLE_IPS.len() as u64);
        for doc in &sessions.docs {
            assert_eq!(doc["domain"], "dev.example");
        }
    }
}
