use std::fmt;
use std::str::FromStr;

use dsclink_transport::ByteChannel;
use tracing::{debug, info};

use crate::command::{op, Command, CATEGORY_LINK};
use crate::error::Result;
use crate::session::Session;

/// A line speed the device can be asked to switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudCandidate {
    /// Code sent as the parameter of the set-speed command.
    pub code: u8,
    /// Speed in bits per second.
    pub rate: u32,
}

/// Candidates in the order they are tried, fastest first.
pub const BAUD_CANDIDATES: [BaudCandidate; 5] = [
    BaudCandidate { code: 8, rate: 115_200 },
    BaudCandidate { code: 7, rate: 57_600 },
    BaudCandidate { code: 6, rate: 38_400 },
    BaudCandidate { code: 4, rate: 19_200 },
    BaudCandidate { code: 0, rate: 9_600 },
];

/// Which speed the negotiation should aim for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedPreference {
    /// The fastest speed the device accepts.
    #[default]
    Auto,
    /// Only this speed; stay put if the device refuses it.
    Fixed(u32),
}

impl SpeedPreference {
    fn admits(self, rate: u32) -> bool {
        match self {
            SpeedPreference::Auto => true,
            SpeedPreference::Fixed(wanted) => wanted == rate,
        }
    }
}

impl fmt::Display for SpeedPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedPreference::Auto => f.write_str("auto"),
            SpeedPreference::Fixed(rate) => write!(f, "{rate}"),
        }
    }
}

impl FromStr for SpeedPreference {
    type Err = String;

    /// `auto`, `0` or one of the candidate rates.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(SpeedPreference::Auto);
        }
        let rate: u32 = s
            .parse()
            .map_err(|_| format!("invalid speed '{s}': expected 'auto' or a number"))?;
        if rate == 0 {
            return Ok(SpeedPreference::Auto);
        }
        if BAUD_CANDIDATES.iter().any(|c| c.rate == rate) {
            Ok(SpeedPreference::Fixed(rate))
        } else {
            let known: Vec<String> = BAUD_CANDIDATES.iter().map(|c| c.rate.to_string()).collect();
            Err(format!(
                "unsupported speed {rate}: expected one of {}",
                known.join(", ")
            ))
        }
    }
}

/// Walk `candidates` in order and move the link to the first one the device
/// accepts.
///
/// A candidate is accepted when the first byte of the answer to the
/// set-speed command is zero. Returns the speed in effect afterwards, which
/// is the unchanged current speed if nothing was accepted.
pub fn negotiate<C: ByteChannel>(
    session: &mut Session<C>,
    candidates: &[BaudCandidate],
    preference: SpeedPreference,
) -> Result<u32> {
    for candidate in candidates.iter().filter(|c| preference.admits(c.rate)) {
        let command = Command::with_u8(CATEGORY_LINK, op::SET_SPEED, candidate.code);
        let answer = session.execute(&command)?;
        if answer.first() != Some(&0) {
            debug!(rate = candidate.rate, status = ?answer.first(), "speed refused");
            continue;
        }
        session.switch_speed(candidate.rate)?;
        info!(rate = candidate.rate, "link speed changed");
        return Ok(candidate.rate);
    }
    let speed = session.speed();
    info!(speed, "keeping current link speed");
    Ok(speed)
}

impl<C: ByteChannel> Session<C> {
    /// Negotiate the fastest acceptable speed from [`BAUD_CANDIDATES`].
    pub fn set_preferred_speed(&mut self, preference: SpeedPreference) -> Result<u32> {
        negotiate(self, &BAUD_CANDIDATES, preference)
    }
}
