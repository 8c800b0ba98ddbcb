//! Store selection and scheduler wiring.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use sweepd_core::NodeId;
use sweepd_events::{CommandClient, InMemoryCommandBus};
use sweepd_infra::jobs::{JobManager, ManagerJobAdapter};
use sweepd_infra::{
    InMemoryTtlStore, PostgresTtlStore, SchemaCatalog, SchemaSource, TtlConfig, TtlSettings,
    TtlStore,
};

/// Grace period on top of the manual trigger deadline before the HTTP layer
/// gives up waiting for a trigger response.
const TRIGGER_RESPONSE_SLACK: Duration = Duration::from_secs(10);

/// Everything the handlers need.
pub struct AppServices {
    pub adapter: ManagerJobAdapter,
    pub commands: Arc<dyn CommandClient>,
    pub settings: watch::Sender<TtlSettings>,
    pub catalog: Arc<dyn SchemaCatalog>,
    pub trigger_timeout: Duration,
}

/// One backing store seen through the three traits the scheduler uses.
#[derive(Clone)]
pub struct Stores {
    pub ttl: Arc<dyn TtlStore>,
    pub schema: Arc<dyn SchemaSource>,
    pub catalog: Arc<dyn SchemaCatalog>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = InMemoryTtlStore::arc();
        Self {
            ttl: store.clone(),
            schema: store.clone(),
            catalog: store,
        }
    }

    pub fn postgres(store: PostgresTtlStore) -> Self {
        let store = Arc::new(store);
        Self {
            ttl: store.clone(),
            schema: store.clone(),
            catalog: store,
        }
    }
}

/// Pick the store from the environment.
///
/// Postgres is used when `USE_PERSISTENT_STORES=1` and `DATABASE_URL` is set;
/// otherwise everything stays in memory.
pub async fn build_stores() -> anyhow::Result<Stores> {
    let persistent = std::env::var("USE_PERSISTENT_STORES").is_ok_and(|v| v == "1");
    let database_url = std::env::var("DATABASE_URL").ok();

    match (persistent, database_url) {
        (true, Some(url)) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await?;
            let store = PostgresTtlStore::new(pool);
            store.migrate().await?;
            tracing::info!("using postgres stores");
            Ok(Stores::postgres(store))
        }
        (true, None) => {
            tracing::warn!("USE_PERSISTENT_STORES=1 but DATABASE_URL is not set; using in-memory stores");
            Ok(Stores::in_memory())
        }
        (false, _) => {
            tracing::info!("using in-memory stores");
            Ok(Stores::in_memory())
        }
    }
}

/// Build the job manager and the services the HTTP layer shares with it.
///
/// The manager is returned unstarted; the caller runs it.
pub fn wire(
    node_id: NodeId,
    stores: Stores,
    config: TtlConfig,
    leader: bool,
) -> (Arc<AppServices>, JobManager) {
    let (settings_tx, settings_rx) = watch::channel(TtlSettings::default());
    let commands = Arc::new(InMemoryCommandBus::new());

    let manager = JobManager::new(node_id, stores.ttl, stores.schema, config.clone(), settings_rx)
        .with_leader(Arc::new(move || leader))
        .with_command_client(commands.clone());

    let services = AppServices {
        adapter: manager.adapter(),
        commands,
        settings: settings_tx,
        catalog: stores.catalog,
        trigger_timeout: config.manual_trigger_deadline + TRIGGER_RESPONSE_SLACK,
    };
    (Arc::new(services), manager)
}
