use std::ops::RangeInclusive;

use crate::error::{BatchError, Result};

/// Marker in a request's extension string that selects a subrange of an array.
pub const ARRAY_RANGE: &str = "range=";

/// A job array: a fixed number of member slots indexed from zero.
///
/// A slot holds the member's job id, or `None` once the member has been
/// deleted and pruned.
#[derive(Debug, Clone)]
pub struct JobArray {
    pub id: String,
    pub owner: String,
    slots: Vec<Option<String>>,
}

impl JobArray {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, size: usize) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            slots: vec![None; size],
        }
    }

    /// Build an array whose members follow the `<seq>[<index>].<server>` naming.
    pub fn with_members(id: &str, owner: &str, size: usize) -> Self {
        let mut array = Self::new(id, owner, size);
        for index in 0..size {
            array.slots[index] = Some(member_id(id, index));
        }
        array
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&str> {
        self.slots.get(index).and_then(|s| s.as_deref())
    }

    /// Drop a member whose job no longer exists.
    pub fn prune(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if let Some(job_id) = slot.take() {
                tracing::debug!(array_id = %self.id, index, job_id = %job_id, "Pruned array slot");
            }
        }
    }

    /// Index of the first occupied slot.
    pub fn first_job_index(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_some)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Member job id for `index` of array `id`, e.g. `12[3].srv` for `12[].srv`.
pub fn member_id(array_id: &str, index: usize) -> String {
    match array_id.find("[]") {
        Some(pos) => format!("{}[{}]{}", &array_id[..pos], index, &array_id[pos + 2..]),
        None => format!("{}[{}]", array_id, index),
    }
}

/// Extract the range expression from a request extension, if present.
pub fn range_from_extend(extend: Option<&str>) -> Option<&str> {
    let extend = extend?;
    let start = extend.find(ARRAY_RANGE)? + ARRAY_RANGE.len();
    let rest = &extend[start..];
    Some(rest.split(';').next().unwrap_or(rest).trim())
}

/// Parse an array range expression such as `0-4,7,9-10`.
///
/// Ranges are inclusive; an empty expression or a descending range is
/// invalid.
pub fn parse_array_range(expr: &str) -> Result<Vec<RangeInclusive<usize>>> {
    let invalid = || BatchError::InvalidRequest(format!("invalid array range \"{}\"", expr));

    if expr.trim().is_empty() {
        return Err(invalid());
    }

    expr.split(',')
        .map(|part| {
            let part = part.trim();
            let (lo, hi) = match part.split_once('-') {
                Some((lo, hi)) => (lo.trim(), hi.trim()),
                None => (part, part),
            };
            let lo: usize = lo.parse().map_err(|_| invalid())?;
            let hi: usize = hi.parse().map_err(|_| invalid())?;
            if lo > hi {
                return Err(invalid());
            }
            Ok(lo..=hi)
        })
        .collect()
}
