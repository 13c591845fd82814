//! Service Registry (C2): name-keyed lookup of capabilities handlers
//! consume (LLM client, file I/O, HTTP, memory, conversation store, etc.).
//!
//! Resolution is lock-free once the registry is frozen; mutation always
//! takes the exclusive lock and appends to the audit log, per §5.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};
use crate::registry::Environment;

/// A type-erased service capability. Handlers downcast via [`ServiceHandle::downcast`].
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// A lazily-instantiated binding: either a concrete value or a factory run
/// once on first resolve and memoized in place.
enum Binding {
    Value(ServiceHandle),
    Factory(Arc<dyn Fn() -> ServiceHandle + Send + Sync>),
}

struct Entry {
    binding: Binding,
    final_: bool,
    immutable: bool,
}

/// One audit log record: every registration, override, or failed attempt.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub caller: String,
    pub environment: &'static str,
    pub success: bool,
    pub reason: Option<String>,
}

/// Options controlling one `register` call.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Marks the key as never overridable again.
    pub final_: bool,
    /// Rejects a second registration once bound, even without freezing.
    pub immutable: bool,
    /// Requests overriding an existing binding.
    pub override_: bool,
    /// Required when overriding in production.
    pub reason: Option<String>,
    /// Attribution recorded in the audit log.
    pub caller: String,
}

/// A scoped override restoring prior bindings when dropped. Returned by
/// [`ServiceRegistry::temporary_override`]; not constructible in production.
pub struct TemporaryOverrideGuard<'a> {
    registry: &'a ServiceRegistry,
    restore: Vec<(String, Option<Entry>)>,
}

impl<'a> Drop for TemporaryOverrideGuard<'a> {
    fn drop(&mut self) {
        let mut bindings = self.registry.bindings.write().unwrap();
        for (key, prior) in self.restore.drain(..) {
            match prior {
                Some(entry) => {
                    bindings.insert(key, entry);
                }
                None => {
                    bindings.remove(&key);
                }
            }
        }
    }
}

/// Name-keyed container of service capabilities, with override/final/
/// immutable rules and a bounded audit trail.
pub struct ServiceRegistry {
    bindings: RwLock<HashMap<String, Entry>>,
    frozen: RwLock<FreezeState>,
    audit_log: RwLock<Vec<AuditEntry>>,
    max_audit_entries: usize,
    environment: Environment,
}

#[derive(Debug, Default)]
enum FreezeState {
    #[default]
    Unfrozen,
    FrozenGlobally,
    FrozenKeys(HashSet<String>),
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

impl ServiceRegistry {
    pub fn new(environment: Environment) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            frozen: RwLock::new(FreezeState::Unfrozen),
            audit_log: RwLock::new(Vec::new()),
            max_audit_entries: 10_000,
            environment,
        }
    }

    fn record(&self, key: &str, caller: &str, success: bool, reason: Option<String>) {
        let mut log = self.audit_log.write().unwrap();
        log.push(AuditEntry {
            timestamp: Utc::now(),
            key: key.to_string(),
            caller: caller.to_string(),
            environment: match self.environment {
                Environment::Development => "development",
                Environment::Production => "production",
            },
            success,
            reason,
        });
        if log.len() > self.max_audit_entries {
            let excess = log.len() - self.max_audit_entries;
            log.drain(0..excess);
        }
    }

    fn is_frozen_for(&self, key: &str) -> bool {
        match &*self.frozen.read().unwrap() {
            FreezeState::Unfrozen => false,
            FreezeState::FrozenGlobally => true,
            FreezeState::FrozenKeys(keys) => keys.contains(key),
        }
    }

    pub fn register(
        &self,
        key: &str,
        value: ServiceHandle,
        options: RegisterOptions,
    ) -> Result<()> {
        self.register_binding(key, Binding::Value(value), options)
    }

    pub fn register_factory(
        &self,
        key: &str,
        factory: Arc<dyn Fn() -> ServiceHandle + Send + Sync>,
        options: RegisterOptions,
    ) -> Result<()> {
        self.register_binding(key, Binding::Factory(factory), options)
    }

    fn register_binding(&self, key: &str, binding: Binding, options: RegisterOptions) -> Result<()> {
        let mut bindings = self.bindings.write().unwrap();
        let existing = bindings.get(key);

        if let Some(entry) = existing {
            if entry.final_ {
                let msg = format!("key '{key}' is final and cannot be overridden");
                self.record(key, &options.caller, false, Some(msg.clone()));
                return Err(CoreError::Internal(msg));
            }
            if entry.immutable {
                let msg = format!("key '{key}' is immutable and already bound");
                self.record(key, &options.caller, false, Some(msg.clone()));
                return Err(CoreError::Internal(msg));
            }
        }

        if existing.is_some() {
            if !options.override_ {
                let msg = format!("key '{key}' is already bound; pass override to replace it");
                self.record(key, &options.caller, false, Some(msg.clone()));
                return Err(CoreError::Internal(msg));
            }
            if self.is_frozen_for(key) && !options.override_ {
                let msg = format!("key '{key}' is frozen");
                self.record(key, &options.caller, false, Some(msg.clone()));
                return Err(CoreError::Internal(msg));
            }
            if self.environment == Environment::Production && options.reason.is_none() {
                let msg = format!("overriding '{key}' in production requires a reason");
                self.record(key, &options.caller, false, Some(msg.clone()));
                return Err(CoreError::Internal(msg));
            }
        }

        bindings.insert(
            key.to_string(),
            Entry {
                binding,
                final_: options.final_,
                immutable: options.immutable,
            },
        );
        self.record(key, &options.caller, true, options.reason.clone());
        Ok(())
    }

    /// Resolves `key`, instantiating a factory binding lazily on first use.
    pub fn resolve(&self, key: &str) -> Result<ServiceHandle> {
        {
            let bindings = self.bindings.read().unwrap();
            if let Some(entry) = bindings.get(key) {
                if let Binding::Value(v) = &entry.binding {
                    return Ok(v.clone());
                }
            } else {
                return Err(self.not_found_error(key));
            }
        }

        let mut bindings = self.bindings.write().unwrap();
        match bindings.get_mut(key) {
            Some(entry) => {
                let value = match &entry.binding {
                    Binding::Value(v) => v.clone(),
                    Binding::Factory(f) => {
                        let v = f();
                        entry.binding = Binding::Value(v.clone());
                        v
                    }
                };
                Ok(value)
            }
            None => Err(self.not_found_error(key)),
        }
    }

    fn not_found_error(&self, key: &str) -> CoreError {
        let bindings = self.bindings.read().unwrap();
        let mut candidates: Vec<&String> = bindings.keys().collect();
        candidates.sort_by_key(|k| edit_distance(k, key));
        let suggestion = candidates
            .first()
            .map(|k| format!(" (did you mean '{k}'?)"))
            .unwrap_or_default();
        CoreError::MissingService {
            node_id: String::new(),
            service: format!("{key}{suggestion}"),
        }
    }

    pub fn freeze(&self, keys: Option<Vec<String>>) {
        let mut frozen = self.frozen.write().unwrap();
        *frozen = match keys {
            Some(keys) => FreezeState::FrozenKeys(keys.into_iter().collect()),
            None => FreezeState::FrozenGlobally,
        };
    }

    /// Scoped replacement for tests; restores prior bindings when the guard
    /// drops. Rejected in production.
    pub fn temporary_override(
        &self,
        overrides: HashMap<String, ServiceHandle>,
    ) -> Result<TemporaryOverrideGuard<'_>> {
        if self.environment == Environment::Production {
            return Err(CoreError::Internal(
                "temporary_override is not allowed in production".to_string(),
            ));
        }
        let mut bindings = self.bindings.write().unwrap();
        let mut restore = Vec::with_capacity(overrides.len());
        for (key, value) in overrides {
            let prior = bindings.remove(&key);
            restore.push((
                key.clone(),
                prior.map(|e| Entry {
                    binding: e.binding,
                    final_: e.final_,
                    immutable: e.immutable,
                }),
            ));
            bindings.insert(
                key,
                Entry {
                    binding: Binding::Value(value),
                    final_: false,
                    immutable: false,
                },
            );
        }
        drop(bindings);
        Ok(TemporaryOverrideGuard {
            registry: self,
            restore,
        })
    }

    pub fn audit(&self) -> Vec<AuditEntry> {
        self.audit_log.read().unwrap().clone()
    }
}

/// Simple Levenshtein distance, used only to rank "did you mean" suggestions.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        dp[0][j] = j;
    }
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[a.len()][b.len()]
}
