//! EDR Manager Binary
//!
//! Runs the lifecycle polling loops and the issuer `/token` endpoint.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use edr_core::crypto::SerializablePublicKey;
use edr_core::{KeyPair, PublicKey};
use edr_manager::collaborators::{
    MemoryAccessTokenStore, MemoryNegotiationService, MemoryTransferProcessService,
};
use edr_manager::manager::{CompositeRenewal, TokenRefreshRenewal, TransferRenewal};
use edr_manager::{
    create_router, AppState, Clock, EdrManager, EdrStore, ManagerConfig, MemoryStore,
    ParticipantKeyRegistry, SystemClock, TokenIssuer,
};
use edr_refresh::{EmbeddedSecureTokenService, HttpTokenRefreshClient, MemoryVault, Vault};

/// Vault alias of the participant signing key
const SIGNING_KEY_ALIAS: &str = "edr-signing-key";

/// Register keys given as a JSON object of participant id to `{kid, key}`
fn register_trusted_keys(registry: &ParticipantKeyRegistry, json: &str) {
    let keys: HashMap<String, SerializablePublicKey> = match serde_json::from_str(json) {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed EDR_TRUSTED_KEYS");
            return;
        }
    };
    for (participant, key) in keys {
        match PublicKey::try_from(key) {
            Ok(key) => registry.register_participant(participant, key),
            Err(e) => warn!(participant = %participant, error = %e, "Ignoring invalid trusted key"),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = ManagerConfig::from_env().expect("Invalid EDR_* configuration");

    // Initialize logging
    let log_level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Participant signing key, generated when none is configured
    let kid = env::var("EDR_KEY_ID").unwrap_or_else(|_| format!("{}#key-1", config.participant_id));
    let signing_key = match env::var("EDR_SIGNING_KEY") {
        Ok(encoded) => KeyPair::from_base64(&kid, &encoded).expect("EDR_SIGNING_KEY must be a base64 Ed25519 seed"),
        Err(_) => {
            warn!("EDR_SIGNING_KEY not set, generated an ephemeral signing key");
            KeyPair::generate(&kid)
        }
    };

    let vault = Arc::new(MemoryVault::new());
    vault
        .store_secret(&config.participant_id, SIGNING_KEY_ALIAS, signing_key.to_base64())
        .await
        .expect("Failed to store signing key");

    // Initialize storage
    let store: Arc<dyn EdrStore> = match config.database_url.as_deref() {
        #[cfg(feature = "postgres")]
        Some(url) => Arc::new(
            edr_manager::PostgresStore::new(url)
                .await
                .expect("Failed to connect to database")
                .with_clock(clock.clone())
                .with_lease_duration(config.lease_duration_ms),
        ),
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            warn!("EDR_DATABASE_URL set but built without the postgres feature, using memory store");
            Arc::new(MemoryStore::with_clock(clock.clone()).with_lease_duration(config.lease_duration_ms))
        }
        None => Arc::new(MemoryStore::with_clock(clock.clone()).with_lease_duration(config.lease_duration_ms)),
    };

    // Consumer side: renewal through refresh or new transfer
    let sts = Arc::new(
        EmbeddedSecureTokenService::new(vault, config.participant_id.as_str(), SIGNING_KEY_ALIAS, kid.as_str())
            .with_validity(config.issuer.token_validity_secs),
    );
    let refresh_client = Arc::new(HttpTokenRefreshClient::new(config.participant_id.as_str(), sts));
    let renewer = Arc::new(CompositeRenewal::new(
        TokenRefreshRenewal::new(refresh_client),
        TransferRenewal::new(
            Arc::new(MemoryTransferProcessService::new()),
            Arc::new(MemoryNegotiationService::new()),
        ),
    ));

    let manager = Arc::new(EdrManager::new(&config, store, renewer, clock.clone()));
    let handle = manager.start();

    // Issuer side
    let registry = Arc::new(ParticipantKeyRegistry::new(signing_key.clone()));
    registry.register_participant(config.participant_id.as_str(), signing_key.public_key());
    if let Ok(trusted) = env::var("EDR_TRUSTED_KEYS") {
        register_trusted_keys(&registry, &trusted);
    }
    let issuer = Arc::new(TokenIssuer::new(
        config.participant_id.as_str(),
        registry,
        Arc::new(MemoryAccessTokenStore::new()),
        config.issuer.clone(),
        clock,
    ));

    info!(
        participant = %config.participant_id,
        kid = %kid,
        port = config.port,
        "Starting EDR manager"
    );

    let app = create_router(Arc::new(AppState { issuer }));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "EDR manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    handle.shutdown().await;
}
