use std::env;
use std::time::Duration;

use crate::error::CoreError;
use crate::gateway::GoogleCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub database_name: String,
    pub store_backend: StoreBackend,
    pub seed_users_file: Option<String>,
    pub jwt_secret: String,
    pub frontend_origin: String,
    pub google_credentials: Option<GoogleCredentials>,
    pub gateway_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, CoreError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store_backend = match var("STORE_BACKEND").as_deref() {
            None | Some("mongo") => StoreBackend::Mongo,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(CoreError::Config(format!("unknown STORE_BACKEND {other:?}")));
            }
        };

        let gateway_timeout = match var("GATEWAY_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| CoreError::Config(format!("GATEWAY_TIMEOUT_SECS: {e}")))?,
            None => Duration::from_secs(10),
        };

        // Both the client id and the refresh token are needed to mint tokens.
        let google_credentials = match (
            var("GOOGLE_CLIENT_ID"),
            var("GOOGLE_CLIENT_SECRET"),
            var("GOOGLE_REFRESH_TOKEN"),
        ) {
            (Some(client_id), client_secret, Some(refresh_token)) => Some(GoogleCredentials {
                client_id,
                client_secret: client_secret.unwrap_or_default(),
                refresh_token,
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            mongo_uri: var("MONGO_URI").unwrap_or_else(|| "mongodb://localhost:27017".to_string()),
            database_name: var("DATABASE_NAME").unwrap_or_else(|| "p2p_learning".to_string()),
            store_backend,
            seed_users_file: var("SEED_USERS_FILE"),
            jwt_secret: var("JWT_SECRET")
                .ok_or_else(|| CoreError::Config("JWT_SECRET must be set".to_string()))?,
            frontend_origin: var("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            google_credentials,
            gateway_timeout,
        })
    }
}
