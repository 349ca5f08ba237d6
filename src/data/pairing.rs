//! Background/signal frame pairing.
//!
//! Frames arrive strictly alternating: a background exposure followed by the signal
//! exposure it belongs to. [`FramePairer`] tracks which one is expected next with the
//! two-state [`PairState`] and produces the background-subtracted signal once a pair is
//! complete. A background is only ever used for the signal that immediately follows it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::image::ImageGrid;
use crate::error::{AppResult, DaqError};

/// How the captured background enters the subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    /// Discard the background readout and subtract zeros.
    #[default]
    Zeroed,
    /// Subtract the captured background frame.
    Captured,
}

/// Role of a frame within its pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePurpose {
    /// Reference exposure.
    Background,
    /// Measurement exposure.
    Signal,
}

/// A frame tagged with its purpose and its 1-based position in the session.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// Background or signal.
    pub purpose: FramePurpose,
    /// Readout ordinal, `1..=2 * frame_count`.
    pub ordinal: u64,
    /// Oriented image.
    pub image: ImageGrid,
}

/// Which frame the pairer expects next.
#[derive(Debug, Clone, Default)]
pub enum PairState {
    /// Waiting for the background of the next pair.
    #[default]
    ExpectBackground,
    /// Holding a background, waiting for its signal.
    ExpectSignal {
        /// Background to subtract from the coming signal.
        background: Arc<CapturedFrame>,
    },
}

/// A completed background/signal pair.
#[derive(Debug, Clone)]
pub struct FramePair {
    /// 1-based pair number, the sequence index of the result.
    pub pair_index: u32,
    /// Background as used for subtraction.
    pub background: Arc<CapturedFrame>,
    /// Raw signal frame.
    pub signal: Arc<CapturedFrame>,
    /// `signal - background`, unclipped.
    pub subtracted: ImageGrid,
}

/// Result of feeding one frame to the pairer.
#[derive(Debug, Clone)]
pub enum PairOutcome {
    /// A background was stored; no result yet.
    BackgroundStored(Arc<CapturedFrame>),
    /// A signal completed the pair.
    Pair(FramePair),
}

/// Two-state machine turning alternating readouts into subtracted pairs.
#[derive(Debug)]
pub struct FramePairer {
    mode: BackgroundMode,
    state: PairState,
    pairs: u32,
}

impl FramePairer {
    /// Start expecting a background.
    pub fn new(mode: BackgroundMode) -> Self {
        Self {
            mode,
            state: PairState::ExpectBackground,
            pairs: 0,
        }
    }

    /// Purpose of the next frame to be accepted.
    pub fn expected_purpose(&self) -> FramePurpose {
        match self.state {
            PairState::ExpectBackground => FramePurpose::Background,
            PairState::ExpectSignal { .. } => FramePurpose::Signal,
        }
    }

    /// Completed pairs so far.
    pub fn pairs_completed(&self) -> u32 {
        self.pairs
    }

    /// Feed the next readout.
    pub fn accept(&mut self, ordinal: u64, image: ImageGrid) -> AppResult<PairOutcome> {
        match std::mem::take(&mut self.state) {
            PairState::ExpectBackground => {
                let image = match self.mode {
                    BackgroundMode::Zeroed => ImageGrid::zeros(image.dim()),
                    BackgroundMode::Captured => image,
                };
                let background = Arc::new(CapturedFrame {
                    purpose: FramePurpose::Background,
                    ordinal,
                    image,
                });
                self.state = PairState::ExpectSignal {
                    background: Arc::clone(&background),
                };
                Ok(PairOutcome::BackgroundStored(background))
            }
            PairState::ExpectSignal { background } => {
                if background.image.dim() != image.dim() {
                    return Err(DaqError::Processing(format!(
                        "signal shape {:?} differs from background shape {:?}",
                        image.dim(),
                        background.image.dim()
                    )));
                }
                let subtracted = &image - &background.image;
                self.pairs += 1;
                Ok(PairOutcome::Pair(FramePair {
                    pair_index: self.pairs,
                    background,
                    signal: Arc::new(CapturedFrame {
                        purpose: FramePurpose::Signal,
                        ordinal,
                        image,
                    }),
                    subtracted,
                }))
            }
        }
    }
}
