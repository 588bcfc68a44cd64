//! Node instrumentation.

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Labels for messages dropped by validation.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub(crate) struct Dropped {
    /// Message type ("vote" or "proposal").
    pub message: String,
    /// Validation failure that caused the drop.
    pub reason: String,
}

pub(crate) struct Metrics {
    /// Current view of the node.
    pub current_view: Gauge,
    /// Height of the decided certificate.
    pub decided_height: Gauge,
    /// Certificates assembled from vote quorums.
    pub certificates: Counter,
    /// Messages dropped by validation, by type and reason.
    pub dropped: Family<Dropped, Counter>,
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let current_view = Gauge::default();
        let decided_height = Gauge::default();
        let certificates = Counter::default();
        let dropped = Family::<Dropped, Counter>::default();
        registry.register("current_view", "current view of the node", current_view.clone());
        registry.register(
            "decided_height",
            "height of the decided certificate",
            decided_height.clone(),
        );
        registry.register(
            "certificates",
            "certificates assembled from vote quorums",
            certificates.clone(),
        );
        registry.register(
            "dropped",
            "messages dropped by validation, by type and reason",
            dropped.clone(),
        );
        Self {
            current_view,
            decided_height,
            certificates,
            dropped,
        }
    }

    pub fn dropped_vote(&self, reason: &str) {
        self.dropped
            .get_or_create(&Dropped {
                message: "vote".to_string(),
                reason: reason.to_string(),
            })
            .inc();
    }

    pub fn dropped_proposal(&self, reason: &str) {
        self.dropped
            .get_or_create(&Dropped {
                message: "proposal".to_string(),
                reason: reason.to_string(),
            })
            .inc();
    }
}
