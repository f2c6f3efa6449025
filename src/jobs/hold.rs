use std::fmt;
use std::ops::{BitOr, BitOrAssign, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

/// Name of the hold attribute in hold and release requests.
pub const HOLD_ATTR_NAME: &str = "Hold_Types";

/// Set of hold kinds placed on a job.
///
/// Each kind is tagged by who may set or clear it:
/// - `USER` (`u`): the job owner
/// - `OTHER` (`o`): operators and managers
/// - `SYSTEM` (`s`): managers only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldTypes(u8);

impl HoldTypes {
    pub const NONE: HoldTypes = HoldTypes(0);
    pub const USER: HoldTypes = HoldTypes(0b001);
    pub const OTHER: HoldTypes = HoldTypes(0b010);
    pub const SYSTEM: HoldTypes = HoldTypes(0b100);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: HoldTypes) -> bool {
        self.0 & other.0 == other.0 && !other.is_empty()
    }

    pub fn intersects(self, other: HoldTypes) -> bool {
        self.0 & other.0 != 0
    }

    /// Decode the textual hold value, e.g. `"uo"`; `"n"` is the empty set.
    pub fn decode(value: &str) -> Result<Self> {
        let mut holds = HoldTypes::NONE;
        for ch in value.trim().chars() {
            match ch {
                'u' | 'U' => holds |= HoldTypes::USER,
                'o' | 'O' => holds |= HoldTypes::OTHER,
                's' | 'S' => holds |= HoldTypes::SYSTEM,
                'n' | 'N' => {}
                other => {
                    return Err(BatchError::InvalidRequest(format!(
                        "unknown hold type '{}' in \"{}\"",
                        other, value
                    )))
                }
            }
        }
        Ok(holds)
    }

    /// Apply `delta` to this set using the attribute-codec set semantics.
    pub fn apply(&mut self, delta: HoldTypes, mode: SetMode) {
        match mode {
            SetMode::Set => *self = delta,
            SetMode::Incr => *self |= delta,
            SetMode::Decr => *self = *self - delta,
        }
    }
}

impl BitOr for HoldTypes {
    type Output = HoldTypes;

    fn bitor(self, rhs: HoldTypes) -> HoldTypes {
        HoldTypes(self.0 | rhs.0)
    }
}

impl BitOrAssign for HoldTypes {
    fn bitor_assign(&mut self, rhs: HoldTypes) {
        self.0 |= rhs.0;
    }
}

impl Sub for HoldTypes {
    type Output = HoldTypes;

    fn sub(self, rhs: HoldTypes) -> HoldTypes {
        HoldTypes(self.0 & !rhs.0)
    }
}

impl fmt::Display for HoldTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "n");
        }
        if self.contains(HoldTypes::USER) {
            write!(f, "u")?;
        }
        if self.contains(HoldTypes::OTHER) {
            write!(f, "o")?;
        }
        if self.contains(HoldTypes::SYSTEM) {
            write!(f, "s")?;
        }
        Ok(())
    }
}

/// How a decoded value is combined with the current attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    Set,
    Incr,
    Decr,
}

/// A decoded hold attribute from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldSpec {
    /// Value as the client sent it, used in log messages
    pub raw: String,
    pub holds: HoldTypes,
}

/// Find and decode the hold attribute in a request's attribute list.
///
/// The list must hold exactly one attribute and it must be the hold
/// attribute; anything else is an invalid request.
pub fn get_hold(attrs: &[(String, String)]) -> Result<HoldSpec> {
    let mut found: Option<&str> = None;
    let mut count = 0usize;

    for (name, value) in attrs {
        if name != HOLD_ATTR_NAME {
            return Err(BatchError::InvalidRequest(format!(
                "unexpected attribute {} in hold request",
                name
            )));
        }
        found = Some(value);
        count += 1;
    }

    match (found, count) {
        (Some(value), 1) => Ok(HoldSpec {
            raw: value.to_string(),
            holds: HoldTypes::decode(value)?,
        }),
        _ => Err(BatchError::InvalidRequest(format!(
            "expected exactly one {} attribute, found {}",
            HOLD_ATTR_NAME, count
        ))),
    }
}
