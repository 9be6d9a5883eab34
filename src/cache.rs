//! Per-connection statement and portal caches.
//!
//! Both caches key on case-sensitive opaque names; the empty name is the
//! unnamed slot and is overwritten by each new Parse or Bind. Hosts can
//! swap the default unbounded maps for the LRU-bounded variants (or their
//! own implementation) through the server config factories.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ahash::AHashMap;
use bytes::Bytes;
use lru::LruCache;

use crate::statements::PreparedStatement;
use crate::types::{FormatCode, Oid, Parameter};

/// A parsed entry: the original query text, the statements the host parser
/// produced for it, and the resolved parameter OIDs.
#[derive(Clone)]
pub struct CachedStatement {
    pub query: String,
    pub statements: Arc<Vec<PreparedStatement>>,
    pub parameter_oids: Arc<Vec<Oid>>,
}

/// A bound, ready-to-execute instance of a cached statement.
#[derive(Clone)]
pub struct Portal {
    pub statement: CachedStatement,
    pub parameters: Vec<Parameter>,
    /// Raw result format codes from Bind: zero codes mean all-text, one code
    /// applies to every column, N codes apply per column.
    pub result_formats: Vec<i16>,
}

pub trait StatementCache: Send {
    fn put(&mut self, name: &str, statement: CachedStatement);
    fn get(&mut self, name: &str) -> Option<CachedStatement>;
    fn remove(&mut self, name: &str) -> Option<CachedStatement>;
}

pub trait PortalCache: Send {
    fn put(&mut self, name: &str, portal: Portal);
    fn get(&mut self, name: &str) -> Option<Portal>;
    fn remove(&mut self, name: &str) -> Option<Portal>;
}

/// Default statement cache: unbounded hash map.
#[derive(Default)]
pub struct UnboundedStatementCache {
    entries: AHashMap<String, CachedStatement>,
}

impl StatementCache for UnboundedStatementCache {
    fn put(&mut self, name: &str, statement: CachedStatement) {
        self.entries.insert(name.to_string(), statement);
    }

    fn get(&mut self, name: &str) -> Option<CachedStatement> {
        self.entries.get(name).cloned()
    }

    fn remove(&mut self, name: &str) -> Option<CachedStatement> {
        self.entries.remove(name)
    }
}

/// Default portal cache: unbounded hash map.
#[derive(Default)]
pub struct UnboundedPortalCache {
    entries: AHashMap<String, Portal>,
}

impl PortalCache for UnboundedPortalCache {
    fn put(&mut self, name: &str, portal: Portal) {
        self.entries.insert(name.to_string(), portal);
    }

    fn get(&mut self, name: &str) -> Option<Portal> {
        self.entries.get(name).cloned()
    }

    fn remove(&mut self, name: &str) -> Option<Portal> {
        self.entries.remove(name)
    }
}

/// Bounded statement cache. Protection against clients that prepare without
/// ever closing; least-recently-used entries are evicted.
pub struct BoundedStatementCache {
    entries: LruCache<String, CachedStatement>,
}

impl BoundedStatementCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        BoundedStatementCache {
            entries: LruCache::new(capacity),
        }
    }
}

impl StatementCache for BoundedStatementCache {
    fn put(&mut self, name: &str, statement: CachedStatement) {
        self.entries.put(name.to_string(), statement);
    }

    fn get(&mut self, name: &str) -> Option<CachedStatement> {
        self.entries.get(name).cloned()
    }

    fn remove(&mut self, name: &str) -> Option<CachedStatement> {
        self.entries.pop(name)
    }
}

/// Bounded portal cache, same eviction policy.
pub struct BoundedPortalCache {
    entries: LruCache<String, Portal>,
}

impl BoundedPortalCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        BoundedPortalCache {
            entries: LruCache::new(capacity),
        }
    }
}

impl PortalCache for BoundedPortalCache {
    fn put(&mut self, name: &str, portal: Portal) {
        self.entries.put(name.to_string(), portal);
    }

    fn get(&mut self, name: &str) -> Option<Portal> {
        self.entries.get(name).cloned()
    }

    fn remove(&mut self, name: &str) -> Option<Portal> {
        self.entries.pop(name)
    }
}

/// Resolve the result format codes from Bind against a column count.
pub(crate) fn resolve_result_formats(
    codes: &[i16],
    column_count: usize,
) -> Result<Vec<FormatCode>, crate::errors::Error> {
    match codes.len() {
        0 => Ok(vec![FormatCode::Text; column_count]),
        1 => {
            let format = FormatCode::from_i16(codes[0])?;
            Ok(vec![format; column_count])
        }
        n if n == column_count => codes.iter().map(|c| FormatCode::from_i16(*c)).collect(),
        n => Err(crate::errors::Error::ProtocolViolation(format!(
            "bind supplies {n} result format codes for {column_count} columns"
        ))),
    }
}

/// Resolve the parameter format code for index `i` under the zero/one/N rule.
pub(crate) fn parameter_format(codes: &[i16], index: usize) -> Result<FormatCode, crate::errors::Error> {
    match codes.len() {
        0 => Ok(FormatCode::Text),
        1 => FormatCode::from_i16(codes[0]),
        _ => match codes.get(index) {
            Some(code) => FormatCode::from_i16(*code),
            None => Err(crate::errors::Error::ProtocolViolation(format!(
                "no format code for parameter {index}"
            ))),
        },
    }
}

/// Build the coerced parameter vector for a Bind message.
pub(crate) fn coerce_parameters(
    registry: &crate::types::TypeRegistry,
    declared: &[Oid],
    formats: &[i16],
    raw: Vec<Option<Bytes>>,
) -> Result<Vec<Parameter>, crate::errors::Error> {
    let mut parameters = Vec::with_capacity(raw.len());
    for (index, bytes) in raw.into_iter().enumerate() {
        let oid = declared.get(index).copied().unwrap_or(crate::types::oids::UNSPECIFIED);
        let format = parameter_format(formats, index)?;
        let parameter = Parameter { oid, format, bytes };
        // Nulls skip validation; everything else must decode under the
        // declared type before the portal is created.
        if parameter.bytes.is_some() {
            parameter.decode(registry)?;
        }
        parameters.push(parameter);
    }
    Ok(parameters)
}
