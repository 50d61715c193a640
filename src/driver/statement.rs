//! Prepared statements and the per-connection statement cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::protocol::FieldDescription;

/// A server-side prepared statement.
#[derive(Debug)]
pub struct PreparedStatement {
    /// Server-side name, unique for the lifetime of the connection.
    pub(crate) name: String,
    pub(crate) sql: String,
    /// Parameter OIDs as declared in Parse (and confirmed by the server's
    /// ParameterDescription).
    pub(crate) param_oids: Vec<u32>,
    /// Row descriptor; empty for statements that return no rows.
    pub(crate) columns: Vec<FieldDescription>,
}

impl PreparedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_oids(&self) -> &[u32] {
        &self.param_oids
    }

    pub fn columns(&self) -> &[FieldDescription] {
        &self.columns
    }

    /// Whether executing this statement can produce data rows.
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// Cache key: the SQL text plus the parameter OIDs inferred from the
/// arguments. The same text with differently-typed arguments prepares a
/// separate statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StatementKey {
    pub sql: String,
    pub param_oids: Vec<u32>,
}

/// LRU cache of prepared statements. Unbounded by default; when bounded,
/// the evicted statement is returned so the caller can close it on the
/// server.
pub(crate) struct StatementCache {
    cache: LruCache<StatementKey, Arc<PreparedStatement>>,
}

impl StatementCache {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        let cache = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self { cache }
    }

    pub fn get(&mut self, key: &StatementKey) -> Option<Arc<PreparedStatement>> {
        self.cache.get(key).cloned()
    }

    /// Insert, returning a statement displaced by the capacity bound (if
    /// any) so its server-side resources can be freed.
    pub fn insert(
        &mut self,
        key: StatementKey,
        statement: Arc<PreparedStatement>,
    ) -> Option<Arc<PreparedStatement>> {
        match self.cache.push(key.clone(), statement) {
            Some((evicted_key, evicted)) if evicted_key != key => Some(evicted),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every entry client-side. Server-side statements live until the
    /// connection closes.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(name: &str) -> Arc<PreparedStatement> {
        Arc::new(PreparedStatement {
            name: name.to_string(),
            sql: "SELECT 1".to_string(),
            param_oids: vec![],
            columns: vec![],
        })
    }

    fn key(sql: &str, oids: &[u32]) -> StatementKey {
        StatementKey { sql: sql.to_string(), param_oids: oids.to_vec() }
    }

    #[test]
    fn test_key_includes_parameter_oids() {
        let mut cache = StatementCache::new(None);
        cache.insert(key("SELECT $1", &[23]), stmt("s1"));
        assert!(cache.get(&key("SELECT $1", &[23])).is_some());
        assert!(cache.get(&key("SELECT $1", &[25])).is_none());
        assert!(cache.get(&key("SELECT $2", &[23])).is_none());
    }

    #[test]
    fn test_unbounded_cache_never_evicts() {
        let mut cache = StatementCache::new(None);
        for i in 0..1000 {
            let evicted = cache.insert(key(&format!("SELECT {}", i), &[]), stmt(&format!("s{}", i)));
            assert!(evicted.is_none());
        }
        assert_eq!(cache.len(), 1000);
    }

    #[test]
    fn test_bounded_cache_evicts_lru() {
        let mut cache = StatementCache::new(NonZeroUsize::new(2));
        assert!(cache.insert(key("a", &[]), stmt("s1")).is_none());
        assert!(cache.insert(key("b", &[]), stmt("s2")).is_none());
        // Touch "a" so "b" is the least recently used.
        assert!(cache.get(&key("a", &[])).is_some());
        let evicted = cache.insert(key("c", &[]), stmt("s3")).expect("eviction");
        assert_eq!(evicted.name, "s2");
        assert!(cache.get(&key("a", &[])).is_some());
        assert!(cache.get(&key("b", &[])).is_none());
    }

    #[test]
    fn test_reinserting_same_key_does_not_report_eviction() {
        let mut cache = StatementCache::new(NonZeroUsize::new(2));
        cache.insert(key("a", &[]), stmt("s1"));
        assert!(cache.insert(key("a", &[]), stmt("s1b")).is_none());
    }
}
