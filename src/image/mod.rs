//! Image ingestion: type sniffing, normalization and sandboxed execution.

pub mod mime;
pub mod normalize;
pub mod sandbox;
pub mod worker;

use std::fmt;

pub use mime::{classify, ImageBlob, MimeType};
pub use normalize::{convert_to_animated, shrink_to_fit};
pub use sandbox::{ImageWorker, SubprocessWorker, ThreadWorker};

use crate::common::{EmoteResult, EMOTE_SIZE_LIMIT};

/// A CPU heavy transform that runs inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Shrink until the image fits the per-emote ceiling.
    Resize,
    /// Turn a still image into a two frame GIF.
    Convert,
}

impl Operation {
    /// Positional argument selecting this operation in worker mode.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::Convert => "convert",
        }
    }

    pub fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "resize" => Some(Self::Resize),
            "convert" => Some(Self::Convert),
            _ => None,
        }
    }

    /// Run the transform in the current thread.
    pub fn apply(&self, image: &ImageBlob) -> EmoteResult<ImageBlob> {
        match self {
            Self::Resize => shrink_to_fit(image, EMOTE_SIZE_LIMIT),
            Self::Convert => convert_to_animated(image),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}
