pub mod anomaly_store;
pub mod artifact;
pub mod detector;

pub use anomaly_store::{AnomalyStatistics, AnomalyStore, RankedAnomaly, StatisticsReport};
pub use artifact::AnomalyArtifact;
pub use detector::{DetectionReport, Detector};
