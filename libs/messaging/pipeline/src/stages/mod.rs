//! Built-in pipeline stages, listed outermost first in the standard chain

pub mod depth_truncate;
pub mod level1_depth;
pub mod lookup_tracking;
pub mod offline;
pub mod partial_download;
pub mod position;

pub use depth_truncate::DepthTruncateStage;
pub use level1_depth::Level1DepthStage;
pub use lookup_tracking::{LookupTrackingConfig, LookupTrackingStage};
pub use offline::{OfflineConfig, OfflineStage};
pub use partial_download::PartialDownloadStage;
pub use position::PositionStage;
