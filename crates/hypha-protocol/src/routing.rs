//! Identity types for routing and tracing.
//!
//! - [`ActorPath`]: hierarchical actor identity (`parent/child`)
//! - [`CorrelationId`]: stable identifier threading one logical request
//!   through traces

use std::fmt;
use std::sync::Arc;

/// Hierarchical identity of an actor within one running system.
///
/// The root segment names a top-level actor; children append as
/// `parent/child`. Paths are unique while the actor is registered, and the
/// path of a stopped actor may be reused. Cloning is an `Arc` bump.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorPath(Arc<str>);

impl ActorPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    /// The path of a child actor: `self/name`.
    pub fn child(&self, name: &str) -> Self {
        Self(Arc::from(format!("{}/{}", self.0, name)))
    }

    /// The parent path, decomposed at the last `/`. Top-level actors have
    /// no parent.
    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('/').map(|(parent, _)| Self::new(parent))
    }

    /// The final segment of the path.
    pub fn name(&self) -> &str {
        self.0.rsplit_once('/').map(|(_, name)| name).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ActorPath {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Correlation ID threading one logical request through traces.
///
/// Generated once at envelope construction and constant across every read;
/// envelopes copied with a different sender share the original value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub u128);

impl CorrelationId {
    /// Generate a new random correlation ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    pub fn from_u128(id: u128) -> Self {
        Self(id)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_hierarchy() {
        let root = ActorPath::new("supervisor");
        let child = root.child("worker");
        assert_eq!(child.as_str(), "supervisor/worker");
        assert_eq!(child.parent(), Some(root.clone()));
        assert_eq!(child.name(), "worker");
        assert_eq!(root.parent(), None);
        assert_eq!(root.name(), "supervisor");
    }

    #[test]
    fn test_path_deep_hierarchy() {
        let leaf = ActorPath::new("a").child("b").child("c");
        assert_eq!(leaf.as_str(), "a/b/c");
        assert_eq!(leaf.parent().unwrap().as_str(), "a/b");
    }

    #[test]
    fn test_correlation_id_uniqueness() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_correlation_id_display() {
        let id = CorrelationId::from_u128(0x123456789abcdef0);
        let formatted = format!("{}", id);
        assert_eq!(formatted, "0000000000000000123456789abcdef0");
        assert_eq!(formatted.len(), 32);
    }
}
