pub mod presenter;

pub use presenter::Presenter;

use crate::capture::frame::CanonicalFrame;
use crate::pipeline::stats::OverlayText;

/// Surface the processed frames end up on
pub trait RenderTarget: Send + Sync {
    /// False while there is nowhere to draw; frames are dropped meanwhile
    fn is_available(&self) -> bool;

    /// Take ownership of a processed frame and its overlay text
    fn present(&self, frame: CanonicalFrame, text: OverlayText);
}
