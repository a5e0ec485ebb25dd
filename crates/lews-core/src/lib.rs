//! LEWS Core - Pure logic for landslide risk detection
//!
//! This crate contains the domain models, geospatial math, and scoring
//! algorithms with NO networking or storage dependencies.

pub mod fusion;
pub mod geo;
pub mod geohash;
pub mod models;
pub mod scorer;
pub mod validate;
pub mod zones;

pub use fusion::{detect_clusters, FusionParams};
pub use models::{
    Alert, AlertStatus, Assessment, Cluster, DetectionType, HazardLevel, HazardZone, Reading,
    RiskLevel, SensorAnalysis,
};
pub use validate::{validate, ValidationError};
