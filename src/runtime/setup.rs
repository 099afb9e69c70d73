//! Wiring from [`Config`] to live components. Every failure here is fatal to the run.

use crate::account::bootstrap::fund_accounts;
use crate::account::keyfile::load_or_create_accounts;
use crate::account::{Account, AccountPool};
use crate::chain::{AlloyGateway, ChainGateway, HeadTracker};
use crate::error::Result;
use crate::probe::submitter::SubmitSettings;
use crate::probe::{LifecycleLedger, ProbeSubmitter, ProbeWatcher};
use crate::shutter::cipher::ShutterEncryption;
use crate::stats::analytics::AnalyticsStore;
use crate::stats::{BlockCache, SqliteAnalyticsStore, StatsCollector, StatsTargets};
use crate::utils::config::Config;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Components shared by both run modes.
pub struct ProbeContext {
    pub config: Config,
    pub gateway: Arc<dyn ChainGateway>,
    pub chain_id: u64,
    pub submit_account: Arc<Account>,
    pub analytics: Option<Arc<dyn AnalyticsStore>>,
    pub heads: HeadTracker,
    pub ledger: Arc<LifecycleLedger>,
    pub collector: Arc<StatsCollector>,
}

impl ProbeContext {
    pub async fn connect(config: Config) -> Result<Self> {
        let gateway: Arc<dyn ChainGateway> =
            Arc::new(AlloyGateway::connect(&config.rpc_url, config.ws_url.clone())?);
        Self::with_gateway(config, gateway).await
    }

    pub async fn with_gateway(config: Config, gateway: Arc<dyn ChainGateway>) -> Result<Self> {
        let chain_id = gateway.chain_id().await?;
        let head = gateway.head_height().await?;
        tracing::info!("[SETUP] connected: chain_id={} head={}", chain_id, head);

        let submit_account = Arc::new(Account::from_private_key(&config.submit_private_key)?);
        submit_account.sync_nonce(gateway.as_ref()).await?;
        tracing::info!(
            "[SETUP] submit account {:#x} (nonce {})",
            submit_account.address(),
            submit_account.current_nonce()
        );

        let analytics: Option<Arc<dyn AnalyticsStore>> = match config.analytics_db_path.as_ref() {
            Some(path) => {
                let store = SqliteAnalyticsStore::open(path)?;
                tracing::info!("[SETUP] analytics store {}", path.display());
                Some(Arc::new(store))
            }
            None => None,
        };

        let collector = Arc::new(StatsCollector::new(
            gateway.clone(),
            analytics.clone(),
            StatsTargets {
                sequencer: config.contracts.sequencer,
                submit_address: submit_account.address(),
                deposit_contract: config.contracts.deposit,
            },
            Arc::new(BlockCache::new(config.block_cache_retention)),
            config.blame_folder.clone(),
        ));

        Ok(Self {
            heads: HeadTracker::new(head),
            ledger: Arc::new(LifecycleLedger::new(config.ledger_done_capacity)),
            config,
            gateway,
            chain_id,
            submit_account,
            analytics,
            collector,
        })
    }

    /// Loads or creates the probe accounts, tops them up and syncs their nonces.
    pub async fn prepare_accounts(&self) -> Result<AccountPool> {
        let accounts = load_or_create_accounts(&self.config.pk_file, self.config.num_accounts)?;
        let pool = AccountPool::new(accounts.into_iter().map(Arc::new).collect())?;
        pool.sync_nonces(self.gateway.as_ref()).await?;
        let funded = fund_accounts(
            self.gateway.as_ref(),
            self.submit_account.as_ref(),
            &pool,
            self.config.min_funding_wei,
            self.chain_id,
            self.config.timeouts.submission,
        )
        .await?;
        tracing::info!(
            "[SETUP] {} probe account(s) ready, {} topped up",
            pool.len(),
            funded
        );
        Ok(pool)
    }

    pub fn submitter(&self, pool: AccountPool, tracker: TaskTracker) -> Result<ProbeSubmitter> {
        let url = self.config.require_encryption_service_url()?;
        let encryption = Arc::new(ShutterEncryption::new(
            self.gateway.clone(),
            self.config.contracts.keyper_set_manager,
            self.config.contracts.key_broadcast,
            url,
        ));
        let watcher = ProbeWatcher::new(
            self.gateway.clone(),
            self.ledger.clone(),
            self.heads.clone(),
            self.config.timeouts,
            self.chain_id,
        );
        Ok(ProbeSubmitter::new(
            self.gateway.clone(),
            encryption,
            pool,
            self.submit_account.clone(),
            self.ledger.clone(),
            watcher,
            tracker,
            SubmitSettings {
                chain_id: self.chain_id,
                sequencer: self.config.contracts.sequencer,
                keyper_set_lookahead: self.config.keyper_set_lookahead,
            },
        ))
    }
}
