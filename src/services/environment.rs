use async_trait::async_trait;
use thiserror::Error;

/// Camera/microphone access as granted by the host. Either half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaGrant {
    pub camera: bool,
    pub microphone: bool,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub device_id: String,
    pub label: String,
}

/// State of the video track backing the camera preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Muted,
    Ended,
    Missing,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("capability is not supported by this environment")]
    Unsupported,
    #[error("request must be triggered by a user gesture")]
    GestureRequired,
    #[error("device unavailable: {0}")]
    DeviceLost(String),
}

/// Host capabilities the session consumes. Singleton resources (camera, fullscreen) are
/// acquired and released only through the integrity monitor.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn acquire_media(&self, device_id: Option<&str>) -> Result<MediaGrant, CapabilityError>;

    fn release_media(&self);

    async fn request_fullscreen(&self) -> Result<(), CapabilityError>;

    fn exit_fullscreen(&self);

    fn is_fullscreen(&self) -> bool;

    fn video_track_state(&self) -> TrackState;

    /// Mean luminance (0..=255) of the most recent preview frame, if one can be sampled.
    fn sample_luminance(&self) -> Option<f32>;

    async fn list_cameras(&self) -> Result<Vec<CameraDevice>, CapabilityError>;
}
