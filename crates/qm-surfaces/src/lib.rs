//! Distraction surfaces: the registry that describes them and the engine that
//! hides and restores them.

mod engine;
mod loading;
mod record;
mod registry;

pub use engine::PROCESSED_ATTR;
pub use engine::PassReport;
pub use engine::SuppressionEngine;
pub use loading::LoadingClassifier;
pub use loading::NamingHeuristics;
pub use record::LayoutOverride;
pub use record::SUPPRESSED_ATTR;
pub use record::SuppressedElementRecord;
pub use registry::ActionButtonPolicy;
pub use registry::Applicability;
pub use registry::ContentGuard;
pub use registry::NavbarFallback;
pub use registry::SuppressionKind;
pub use registry::SurfaceDescriptor;
pub use registry::SurfaceMatcher;
pub use registry::SurfaceRegistry;
