//! Memory intelligence: classification, learning and batch maintenance

pub mod classifier;
pub mod consolidation;
pub mod learning;
pub mod lifecycle;

pub use classifier::{Classification, Classifier, PhraseSet};
pub use consolidation::{MemoryConsolidator, UnionFind};
pub use learning::{
    Detector, DetectorKind, DraftMemory, ExplicitRequestDetector, InsightDetector, Interaction,
    LearningPipeline, PatternLearner, PreferenceLearner,
};
pub use lifecycle::LifecycleManager;
