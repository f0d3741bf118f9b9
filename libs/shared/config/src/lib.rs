use std::env;
use std::str::FromStr;
use tracing::warn;

/// Where appointment requests and the slot catalog are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceBackend {
    Memory,
    Supabase,
}

impl FromStr for PersistenceBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(Self::Memory),
            "supabase" | "postgres" => Ok(Self::Supabase),
            other => Err(format!("Unknown persistence backend: {}", other)),
        }
    }
}

/// When slot exclusivity is enforced for a (doctor, date, slot) tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotExclusivityPolicy {
    /// Any number of pending requests may coexist; exclusivity is decided on approval.
    ResolveAtConfirmation,
    /// Creation is refused when the tuple already holds a confirmed request.
    RejectWhenConfirmed,
}

impl FromStr for SlotExclusivityPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resolve_at_confirmation" | "lenient" => Ok(Self::ResolveAtConfirmation),
            "reject_when_confirmed" | "strict" => Ok(Self::RejectWhenConfirmed),
            other => Err(format!("Unknown slot exclusivity policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub persistence: PersistenceBackend,
    pub server_port: u16,
    pub database_timeout_secs: u64,
    pub slot_catalog_cache_ttl_secs: u64,
    pub slot_exclusivity_policy: SlotExclusivityPolicy,
    pub completion_requires_occurred: bool,
    pub notification_webhook_url: Option<String>,
    /// `doctor_id:user_id` pairs registered in the in-memory doctor directory.
    pub memory_seed_doctors: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            persistence: PersistenceBackend::Memory,
            server_port: 3000,
            database_timeout_secs: 10,
            slot_catalog_cache_ttl_secs: 300,
            slot_exclusivity_policy: SlotExclusivityPolicy::ResolveAtConfirmation,
            completion_requires_occurred: true,
            notification_webhook_url: None,
            memory_seed_doctors: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let supabase_url = env::var("SUPABASE_URL").unwrap_or_else(|_| {
            warn!("SUPABASE_URL not set, using empty value");
            String::new()
        });
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY").unwrap_or_else(|_| {
            warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
            String::new()
        });
        let supabase_jwt_secret = env::var("SUPABASE_JWT_SECRET").unwrap_or_else(|_| {
            warn!("SUPABASE_JWT_SECRET not set, using empty value");
            String::new()
        });

        let supabase_ready = !supabase_url.is_empty() && !supabase_anon_key.is_empty();
        let persistence = match env::var("APPOINTMENT_STORE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{}, falling back to in-memory store", e);
                PersistenceBackend::Memory
            }),
            Err(_) if supabase_ready => PersistenceBackend::Supabase,
            Err(_) => {
                warn!("APPOINTMENT_STORE not set and Supabase not configured, using in-memory store");
                PersistenceBackend::Memory
            }
        };

        let config = Self {
            supabase_url,
            supabase_anon_key,
            supabase_jwt_secret,
            persistence,
            server_port: parse_var("SERVER_PORT", defaults.server_port),
            database_timeout_secs: parse_var("DATABASE_TIMEOUT_SECS", defaults.database_timeout_secs),
            slot_catalog_cache_ttl_secs: parse_var(
                "SLOT_CATALOG_CACHE_TTL_SECS",
                defaults.slot_catalog_cache_ttl_secs,
            ),
            slot_exclusivity_policy: parse_var(
                "SLOT_EXCLUSIVITY_POLICY",
                defaults.slot_exclusivity_policy,
            ),
            completion_requires_occurred: parse_var(
                "COMPLETION_REQUIRES_OCCURRED",
                defaults.completion_requires_occurred,
            ),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            memory_seed_doctors: env::var("MEMORY_SEED_DOCTORS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|entry| !entry.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        let auth_ready = !self.supabase_jwt_secret.is_empty();
        match self.persistence {
            PersistenceBackend::Memory => auth_ready,
            PersistenceBackend::Supabase => {
                auth_ready && !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
            }
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("{} has invalid value {:?} ({}), using {:?}", name, raw, e, default);
            default
        }),
        Err(_) => default,
    }
}
