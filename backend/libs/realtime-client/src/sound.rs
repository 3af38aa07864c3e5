//! Notification sounds keyed by category
//!
//! Lookup is a pure table scan; playback goes through [`SoundPlayer`] so that
//! embedding applications can plug in their own audio backend.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundCue {
    Bid,
    Order,
    Payment,
    Shipment,
    Message,
    Alert,
    Default,
}

const CATEGORY_SOUNDS: &[(&str, SoundCue)] = &[
    ("bid", SoundCue::Bid),
    ("rfq", SoundCue::Bid),
    ("quote", SoundCue::Bid),
    ("order", SoundCue::Order),
    ("payment", SoundCue::Payment),
    ("wallet", SoundCue::Payment),
    ("shipment", SoundCue::Shipment),
    ("delivery", SoundCue::Shipment),
    ("message", SoundCue::Message),
    ("kyc", SoundCue::Alert),
    ("alert", SoundCue::Alert),
    ("system", SoundCue::Alert),
];

/// Exact, case-insensitive category match; anything else gets the default cue
pub fn sound_for(category: Option<&str>) -> SoundCue {
    category
        .and_then(|category| {
            CATEGORY_SOUNDS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(category))
        })
        .map(|(_, cue)| *cue)
        .unwrap_or(SoundCue::Default)
}

impl SoundCue {
    pub fn asset(&self) -> &'static str {
        match self {
            SoundCue::Bid => "sounds/bid.mp3",
            SoundCue::Order => "sounds/order.mp3",
            SoundCue::Payment => "sounds/payment.mp3",
            SoundCue::Shipment => "sounds/shipment.mp3",
            SoundCue::Message => "sounds/message.mp3",
            SoundCue::Alert => "sounds/alert.mp3",
            SoundCue::Default => "sounds/notification.mp3",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SoundError {
    #[error("playback blocked: {0}")]
    Blocked(String),
    #[error("sound backend unavailable: {0}")]
    Unavailable(String),
}

pub trait SoundPlayer: Send + Sync {
    fn play(&self, cue: SoundCue) -> Result<(), SoundError>;
}

/// Player that accepts every cue and plays nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentPlayer;

impl SoundPlayer for SilentPlayer {
    fn play(&self, _cue: SoundCue) -> Result<(), SoundError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_categories() {
        assert_eq!(sound_for(Some("bid")), SoundCue::Bid);
        assert_eq!(sound_for(Some("RFQ")), SoundCue::Bid);
        assert_eq!(sound_for(Some("Wallet")), SoundCue::Payment);
        assert_eq!(sound_for(Some("delivery")), SoundCue::Shipment);
        assert_eq!(sound_for(Some("kyc")), SoundCue::Alert);
    }

    #[test]
    fn test_unmatched_categories_use_default() {
        assert_eq!(sound_for(None), SoundCue::Default);
        assert_eq!(sound_for(Some("bidding")), SoundCue::Default);
        assert_eq!(sound_for(Some("")), SoundCue::Default);
        assert_eq!(SoundCue::Default.asset(), "sounds/notification.mp3");
    }
}
