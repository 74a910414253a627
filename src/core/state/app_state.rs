use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use super::settings::{default_data_dir, ResolverSettings};
use crate::core::cache::FileCacheRepository;
use crate::core::error::ResolverResult;
use crate::core::http::{build_http_client, HttpTransport, ReqwestTransport};
use crate::core::loader::ProviderLoader;
use crate::core::provider::memo::from_minutes;
use crate::core::provider::{AccessTokenSource, OfficialProvider, VersionProvider};
use crate::core::resolver::{ResolutionOrchestrator, SpeedSelector};

/// Everything a host application needs to resolve builds, wired from
/// [`ResolverSettings`].
pub struct ResolverState {
    pub data_dir: PathBuf,
    pub settings: ResolverSettings,
    pub transport: Arc<dyn HttpTransport>,
    pub orchestrator: Arc<ResolutionOrchestrator>,
}

impl ResolverState {
    /// Settings from the default data directory, reqwest transport.
    pub async fn new(credentials: Arc<dyn AccessTokenSource>) -> ResolverResult<Self> {
        let settings = ResolverSettings::load_from(&default_data_dir());
        Self::from_settings(settings, credentials).await
    }

    pub async fn from_settings(
        settings: ResolverSettings,
        credentials: Arc<dyn AccessTokenSource>,
    ) -> ResolverResult<Self> {
        let client = build_http_client(&settings.user_agent, settings.request_timeout())?;
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(client));
        Self::with_transport(settings, credentials, transport).await
    }

    /// Wire loader, cache, official source and orchestrator over `transport`,
    /// then load the mirror set once.
    pub async fn with_transport(
        settings: ResolverSettings,
        credentials: Arc<dyn AccessTokenSource>,
        transport: Arc<dyn HttpTransport>,
    ) -> ResolverResult<Self> {
        let data_dir = settings.resolved_data_dir();
        let platform = settings.platform();

        let loader = ProviderLoader::new(settings.mirrors_dir(), transport.clone())
            .with_seed(settings.seed_mirrors.clone());
        let mut providers = loader.load().await?;

        if let Some(official) = &settings.official {
            let provider: Arc<dyn VersionProvider> = Arc::new(OfficialProvider::new(
                official.manifest_url.clone(),
                credentials,
                transport.clone(),
                from_minutes(official.manifest_ttl_minutes),
            ));
            providers.push(provider);
        }

        let repository = Arc::new(FileCacheRepository::new(settings.cache_dir()));
        let orchestrator = ResolutionOrchestrator::new(platform, repository)
            .with_providers(providers)
            .with_loader(loader)
            .with_ttl(settings.cache_ttl())
            .with_speed_selector(SpeedSelector::new().with_max_ttl(settings.speed_ttl()));

        info!("Resolver ready for {} (data in {:?})", platform, data_dir);

        Ok(Self {
            data_dir,
            settings,
            transport,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn save_settings(&self) -> ResolverResult<()> {
        self.settings.save_to(&self.data_dir)
    }
}
