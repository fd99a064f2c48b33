use std::sync::Arc;

use db::DBService;
use services::services::{
    auth::{AuthError, FirebaseTokenVerifier, SessionGuard, TokenVerifier},
    automation::{AutomationWebhook, WebhookError},
    coach::Coach,
    config::Config,
    gemini::{GeminiClient, GeminiError},
    goals::GoalService,
    google::{GoogleApiError, GoogleClient},
    sync::SyncRegistry,
};
use thiserror::Error;
use tracing::{info, warn};
use utils::noise::NoiseFilter;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Gemini(#[from] GeminiError),
    #[error(transparent)]
    Google(#[from] GoogleApiError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    db: DBService,
    goals: GoalService,
    sync: Arc<SyncRegistry>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    sessions: Arc<SessionGuard>,
    coach: Option<Coach>,
    google: GoogleClient,
    webhook: AutomationWebhook,
    noise: Arc<NoiseFilter>,
}

impl AppState {
    pub fn new(config: Config, db: DBService) -> Result<Self, StateError> {
        let verifier: Option<Arc<dyn TokenVerifier>> = match &config.firebase_project_id {
            Some(project_id) => Some(Arc::new(FirebaseTokenVerifier::new(project_id.clone())?)),
            None => {
                warn!(
                    "FIREBASE_PROJECT_ID not set, authenticated routes will refuse every request"
                );
                None
            }
        };

        let coach = match (&config.gemini_api_key, config.features.coach) {
            (Some(key), true) => Some(Coach::gemini(GeminiClient::new(
                key.clone(),
                Some(config.gemini_model.clone()),
            )?)),
            (None, true) => {
                warn!("GEMINI_API_KEY not set, coach disabled");
                None
            }
            (_, false) => None,
        };

        let webhook = AutomationWebhook::new(config.automation_webhook_url.clone())?;
        info!(
            auth = verifier.is_some(),
            coach = coach.is_some(),
            calendar = config.features.calendar,
            webhook = webhook.is_configured(),
            "application state ready"
        );

        let sync = Arc::new(SyncRegistry::default());
        Ok(Self {
            goals: GoalService::new(db.clone()).with_sync(sync.clone()),
            db,
            sync,
            verifier,
            sessions: Arc::new(SessionGuard::default()),
            coach,
            google: GoogleClient::new()?,
            webhook,
            noise: Arc::new(NoiseFilter::default()),
            config: Arc::new(config),
        })
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn goals(&self) -> &GoalService {
        &self.goals
    }

    pub fn sync(&self) -> &Arc<SyncRegistry> {
        &self.sync
    }

    pub fn verifier(&self) -> Option<&Arc<dyn TokenVerifier>> {
        self.verifier.as_ref()
    }

    pub fn sessions(&self) -> &SessionGuard {
        &self.sessions
    }

    pub fn coach(&self) -> Option<&Coach> {
        self.coach.as_ref()
    }

    pub fn google(&self) -> &GoogleClient {
        &self.google
    }

    pub fn webhook(&self) -> &AutomationWebhook {
        &self.webhook
    }

    pub fn noise(&self) -> &NoiseFilter {
        &self.noise
    }
}
