//! Resolves connection names to the storage backing them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use redis::IntoConnectionInfo;

use crate::config::{CacheConfig, Config, ConnectionConfig};
use crate::models::{BrokerError, BrokerResult};
use crate::storage::{MemoryStorage, RedisStorage, Storage};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_DB: i64 = 0;

/// Where a connection's jobs are stored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Endpoint {
    /// Redis URL. `db`, if given, overrides any database in the URL itself.
    Url { url: String, db: Option<i64> },

    /// Client borrowed from a named cache.
    Cache { name: String },

    Host {
        host: String,
        port: u16,
        db: i64,
        password: Option<String>,
    },
}

impl Endpoint {
    /// Connection details for a Redis client. Cache endpoints have none, their client already
    /// exists.
    pub fn connection_info(&self) -> BrokerResult<redis::ConnectionInfo> {
        match self {
            Endpoint::Url { url, db } => {
                let mut info = url.as_str().into_connection_info()?;
                if let Some(db) = db {
                    info.redis.db = *db;
                }
                Ok(info)
            }
            Endpoint::Host { host, port, db, password } => Ok(redis::ConnectionInfo {
                addr: redis::ConnectionAddr::Tcp(host.clone(), *port),
                redis: redis::RedisConnectionInfo {
                    db: *db,
                    username: None,
                    password: password.clone(),
                },
            }),
            Endpoint::Cache { name } => Err(BrokerError::internal(format!(
                "cache '{}' has no connection details of its own",
                name
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::Url { url, db: Some(db) } => write!(f, "{} (db {})", redact(url), db),
            Endpoint::Url { url, db: None } => write!(f, "{}", redact(url)),
            Endpoint::Cache { name } => write!(f, "cache '{}'", name),
            Endpoint::Host { host, port, db, .. } => write!(f, "{}:{}/{}", host, port, db),
        }
    }
}

/// Hide any credentials in a Redis URL.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &url[..scheme], &url[at + 1..])
        }
        _ => url.to_owned(),
    }
}

impl ConnectionConfig {
    /// Pick an endpoint, preferring a URL, then a cache client, then host fields.
    ///
    /// A cache that doesn't exist or has no client to share is skipped rather than treated as
    /// an error, so the host fields (or their defaults) are used instead.
    pub fn endpoint(&self, caches: &CacheClients) -> Endpoint {
        if let Some(url) = &self.url {
            return Endpoint::Url {
                url: url.clone(),
                db: self.db,
            };
        }

        if let Some(cache) = &self.use_redis_cache {
            if caches.native_client(cache).is_some() {
                return Endpoint::Cache { name: cache.clone() };
            }
            warn!("Cache '{}' has no Redis client to share, using host settings", cache);
        }

        Endpoint::Host {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            db: self.db.unwrap_or(DEFAULT_DB),
            password: self.password.clone(),
        }
    }
}

/// Builds the storage for an endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> BrokerResult<Arc<dyn Storage>>;
}

/// Connects to Redis, using a lazily populated connection pool per endpoint.
#[derive(Clone, Debug)]
pub struct RedisConnector {
    namespace: String,
}

impl RedisConnector {
    pub fn new<S: Into<String>>(namespace: S) -> Self {
        Self { namespace: namespace.into() }
    }
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self::new("rq")
    }
}

impl Connector for RedisConnector {
    fn connect(&self, endpoint: &Endpoint) -> BrokerResult<Arc<dyn Storage>> {
        let storage = RedisStorage::connect(endpoint.connection_info()?)?.with_namespace(&self.namespace);
        Ok(Arc::new(storage))
    }
}

/// Connects every endpoint to in-process storage. Connecting to the same endpoint twice gives
/// the same storage, as it would with Redis.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    stores: Mutex<Vec<(Endpoint, MemoryStorage)>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage previously created for `endpoint`, if any.
    pub fn storage_for(&self, endpoint: &Endpoint) -> Option<MemoryStorage> {
        let stores = self.stores.lock().ok()?;
        stores
            .iter()
            .find(|(e, _)| e == endpoint)
            .map(|(_, storage)| storage.clone())
    }

    /// Number of distinct endpoints connected to.
    pub fn connections_made(&self) -> usize {
        self.stores.lock().map_or(0, |stores| stores.len())
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, endpoint: &Endpoint) -> BrokerResult<Arc<dyn Storage>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| BrokerError::internal("memory connector lock poisoned"))?;
        if let Some((_, storage)) = stores.iter().find(|(e, _)| e == endpoint) {
            return Ok(Arc::new(storage.clone()));
        }

        let storage = MemoryStorage::new();
        stores.push((endpoint.clone(), storage.clone()));
        Ok(Arc::new(storage))
    }
}

/// Named cache clients that connections can borrow instead of creating their own.
#[derive(Debug, Default)]
pub struct CacheClients {
    clients: HashMap<String, Option<Arc<dyn Storage>>>,
}

impl CacheClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache. `None` means the cache exists but exposes no Redis client.
    pub fn insert<S: Into<String>>(&mut self, name: S, client: Option<Arc<dyn Storage>>) {
        self.clients.insert(name.into(), client);
    }

    /// Build clients for configured caches. Caches without a URL get no client.
    pub fn from_config(caches: &HashMap<String, CacheConfig>, connector: &dyn Connector) -> BrokerResult<Self> {
        let mut clients = Self::new();
        for (name, cache) in caches {
            let client = match &cache.url {
                Some(url) => Some(connector.connect(&Endpoint::Url { url: url.clone(), db: None })?),
                None => None,
            };
            clients.insert(name.as_str(), client);
        }
        Ok(clients)
    }

    pub fn native_client(&self, name: &str) -> Option<Arc<dyn Storage>> {
        self.clients.get(name).and_then(|client| client.clone())
    }
}

/// A named connection, shared by every queue handle bound to it.
#[derive(Debug)]
pub struct Connection {
    name: String,
    endpoint: Endpoint,
    storage: Arc<dyn Storage>,
    is_async: bool,
}

impl Connection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Whether queues on this connection hand jobs to workers by default, rather than running
    /// them inline.
    pub fn is_async(&self) -> bool {
        self.is_async
    }
}

/// Immutable mapping of connection names to connections, built once at startup.
#[derive(Debug)]
pub struct ConnectionRegistry {
    configs: HashMap<String, ConnectionConfig>,
    connections: HashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Build every configured connection.
    ///
    /// Fails with `MisconfiguredRegistry` if no connections are configured.
    pub fn new(
        configs: HashMap<String, ConnectionConfig>,
        caches: &CacheClients,
        connector: &dyn Connector,
    ) -> BrokerResult<Self> {
        if configs.is_empty() {
            return Err(BrokerError::MisconfiguredRegistry(
                "no connections defined".to_owned(),
            ));
        }

        let mut connections = HashMap::with_capacity(configs.len());
        for (name, config) in &configs {
            let endpoint = config.endpoint(caches);
            let storage = match &endpoint {
                Endpoint::Cache { name: cache } => match caches.native_client(cache) {
                    Some(client) => client,
                    None => return Err(BrokerError::internal(format!("cache '{}' disappeared", cache))),
                },
                endpoint => connector.connect(endpoint)?,
            };

            info!("Connection '{}' uses {}", name, endpoint);
            let connection = Connection {
                name: name.clone(),
                endpoint,
                storage,
                is_async: config.is_async.unwrap_or(true),
            };
            connections.insert(name.clone(), Arc::new(connection));
        }

        Ok(Self { configs, connections })
    }

    /// Build the registry described by application config, connecting to Redis.
    pub fn from_config(config: &Config) -> BrokerResult<Self> {
        let connector = RedisConnector::new(config.rq.key_namespace.as_str());
        let caches = CacheClients::from_config(&config.caches, &connector)?;
        Self::new(config.connections.clone(), &caches, &connector)
    }

    /// Configuration of the named connection.
    pub fn resolve(&self, name: &str) -> BrokerResult<&ConnectionConfig> {
        self.configs
            .get(name)
            .ok_or_else(|| BrokerError::UnknownConnection(name.to_owned()))
    }

    /// The named connection.
    pub fn connection(&self, name: &str) -> BrokerResult<Arc<Connection>> {
        match self.connections.get(name) {
            Some(connection) => Ok(connection.clone()),
            None => {
                debug!("Lookup of unknown connection '{}'", name);
                Err(BrokerError::UnknownConnection(name.to_owned()))
            }
        }
    }

    /// All connection names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
