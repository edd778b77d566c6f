//! Realtime messaging and game-room server.
//!
//! Run with:
//! ```not_rust
//! UNDERTOW_STORE=memory cargo run --bin undertow-server
//! UNDERTOW_STORE_URL=redis://127.0.0.1:6379 cargo run --bin undertow-server -- --host 0.0.0.0 --port 3000
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use undertow_server::{
    Config, MemoryOutcomeStore, MemoryStore, MembershipProvider, Notifier, RealtimeCore,
    RedisStore, SharedStore, StoreConfig,
    error::CollabError,
    logger::setup_logger,
    ui::Server,
};
use undertow_shared::UserId;

#[derive(Parser, Debug)]
#[command(name = "undertow-server")]
#[command(about = "Realtime messaging, presence, and game-room server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,
}

/// Standalone-mode membership: every online user shares every
/// conversation. A host application embedding the core replaces this
/// with its real conversation data.
struct OnlineUsersMembership {
    store: Arc<dyn SharedStore>,
}

#[async_trait]
impl MembershipProvider for OnlineUsersMembership {
    async fn conversation_members(
        &self,
        _conversation_id: u64,
    ) -> Result<Vec<UserId>, CollabError> {
        let members = self
            .store
            .set_members("ws:online_users")
            .await
            .map_err(|err| CollabError::Membership(err.to_string()))?;
        Ok(members
            .iter()
            .filter_map(|id| id.parse().ok().map(UserId))
            .collect())
    }
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            std::process::exit(2);
        }
    };

    let (store, notifier): (Arc<dyn SharedStore>, Arc<Notifier>) = match &config.store {
        StoreConfig::Redis { url } => {
            let client = match redis::Client::open(url.as_str()) {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!(%err, "invalid store url");
                    std::process::exit(2);
                }
            };
            let store = match RedisStore::connect(url).await {
                Ok(store) => store,
                Err(err) => {
                    tracing::error!(%err, "cannot reach the shared store");
                    std::process::exit(2);
                }
            };
            (Arc::new(store), Notifier::redis(client))
        }
        StoreConfig::Memory => {
            tracing::warn!("in-memory store configured: single-process mode");
            (Arc::new(MemoryStore::new()), Notifier::local())
        }
    };

    let membership = Arc::new(OnlineUsersMembership {
        store: Arc::clone(&store),
    });
    let outcomes = Arc::new(MemoryOutcomeStore::new());

    let core = RealtimeCore::new(config, store, notifier, membership, outcomes);
    let server = Server::new(core);

    match server.run(args.host, args.port).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            tracing::error!(%err, "server error");
            std::process::exit(1);
        }
    }
}
