pub mod commands;
pub mod errors;
pub mod models;
pub mod services;

pub use commands::config::{init_config, load_config, save_config};
pub use commands::scan::{initialize, probe, Ready};
pub use errors::{DetectionError, ScanError};
pub use models::config::ScannerConfig;
pub use models::frame::{Frame, PixelFormat};
pub use models::label::{DominantColor, LabelInfo, ScannedLabel};
pub use models::session::{ScanEvent, ScanState, SessionStatus};
pub use services::camera::ReplayCamera;
#[cfg(feature = "v4l_camera")]
pub use services::camera::V4lCamera;
pub use services::coordinate_mapper::{CoordinateMapper, ScreenRect};
pub use services::frame_source::CameraDevice;
pub use services::scanner::{EventCallback, LabelScanner};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
