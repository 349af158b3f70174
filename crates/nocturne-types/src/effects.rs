use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named status effects a user can carry on their record.
///
/// The set is closed: durations are fixed per effect by the table below and
/// are never user input. Mutual exclusivity between theme-ish effects is a
/// rendering concern, not modelled here.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Effect {
    Rainbow,
    Glow,
    Sparkle,
    HairColor,
    Translation,
    Echo,
    Whisper,
    Shout,
    DarkMode,
    Retro,
    Mirror,
    Speed,
    SlowMotion,
    Lucky,
    Wisdom,
    Charm,
    Mystery,
    Love,
    Invisible,
}

impl Effect {
    /// The stable key this effect uses inside `statusEffects` maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Rainbow => "rainbow",
            Effect::Glow => "glow",
            Effect::Sparkle => "sparkle",
            Effect::HairColor => "hairColor",
            Effect::Translation => "translation",
            Effect::Echo => "echo",
            Effect::Whisper => "whisper",
            Effect::Shout => "shout",
            Effect::DarkMode => "darkMode",
            Effect::Retro => "retro",
            Effect::Mirror => "mirror",
            Effect::Speed => "speed",
            Effect::SlowMotion => "slowMotion",
            Effect::Lucky => "lucky",
            Effect::Wisdom => "wisdom",
            Effect::Charm => "charm",
            Effect::Mystery => "mystery",
            Effect::Love => "love",
            Effect::Invisible => "invisible",
        }
    }

    /// Fixed duration for this effect.
    pub fn duration(&self) -> Duration {
        let mins = match self {
            Effect::Love => 60,
            Effect::DarkMode | Effect::Retro => 60,
            Effect::Invisible => 30,
            _ => 20,
        };
        Duration::from_secs(mins * 60)
    }
}

/// A stored expiry deadline, serialized as epoch milliseconds.
///
/// This is the single expiry check for the whole system: a deadline is active
/// iff it is *strictly* greater than `now`. A deadline equal to `now` is
/// expired. Expired keys are left in storage (lazy expiry, no sweep) and every
/// reader must come through here instead of comparing timestamps ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Expiry(#[serde(with = "chrono::serde::ts_milliseconds")] pub DateTime<Utc>);

impl Expiry {
    /// Deadline `duration` past `now`.
    pub fn after(now: DateTime<Utc>, duration: Duration) -> Self {
        Expiry(now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero()))
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.0 > now
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The effects that were active on a sender at send time, frozen onto the
/// message so later expiry or re-application never changes historical
/// rendering.
pub type EffectSnapshot = BTreeSet<Effect>;
