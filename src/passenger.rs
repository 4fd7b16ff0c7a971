use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// An in-flight work item threaded through a pipeline.
///
/// A passenger pairs an opaque payload with a stable identity. Identity is
/// assigned at creation and survives payload substitution, so a passenger can
/// be tracked across every stage it passes through. Equality, ordering and
/// hashing all go through the identity, never the payload.
#[derive(Debug, Clone)]
pub struct Passenger<T> {
    data: T,
    uuid: Uuid,
    created_at: DateTime<Utc>,
}

impl<T> Passenger<T> {
    /// Wrap a payload in a new passenger with a fresh identity
    pub fn new(data: T) -> Self {
        Self {
            data,
            uuid: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    /// The current payload
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Consume the passenger, yielding the payload
    pub fn into_data(self) -> T {
        self.data
    }

    /// Unique identity of this passenger
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// When the passenger entered the pipeline
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Replace the payload, keeping identity and creation time
    pub fn with_data(self, data: T) -> Self {
        Self { data, ..self }
    }
}

impl<T> PartialEq for Passenger<T> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<T> Eq for Passenger<T> {}

impl<T> Hash for Passenger<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<T> PartialOrd for Passenger<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Passenger<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_survives_payload_swap() {
        let p = Passenger::new("first".to_string());
        let uuid = p.uuid();
        let created = p.created_at();

        let p = p.with_data("second".to_string());
        assert_eq!(p.uuid(), uuid);
        assert_eq!(p.created_at(), created);
        assert_eq!(p.data(), "second");
    }

    #[test]
    fn test_equality_ignores_payload() {
        let a = Passenger::new(1);
        let b = a.clone().with_data(2);
        assert_eq!(a, b);

        let c = Passenger::new(1);
        assert_ne!(a, c);
    }
}
