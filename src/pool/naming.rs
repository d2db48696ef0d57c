//! Pool state lives in container names:
//!
//! ```text
//! <prefix>-<randomID>---<status>[--<expiryStamp>]
//! ```
//!
//! `status` is `new` or `allocated`. Allocated names carry the lease expiry
//! in local wall-clock time as `YYYY-Mon-D-HH:MM:SS`, with spaces written as
//! `--` and colons as `.` so the result is a valid container name. Stamps
//! have whole-second precision.

use chrono::NaiveDateTime;
use rand::Rng;
use std::ops::Range;
use thiserror::Error;

use crate::shared::models::MemberStatus;

pub const NEW_STATUS: &str = "new";
pub const ALLOCATED_STATUS: &str = "allocated";

const STATUS_SEPARATOR: &str = "---";
const STAMP_SEPARATOR: &str = "--";
const STAMP_FORMAT: &str = "%Y-%b-%-d-%H:%M:%S";
const ID_RANGE: Range<u32> = 1_000_000..2_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("container name {name:?} has no status segment")]
    MissingSegment { name: String },

    #[error("container name {name:?} has malformed expiry {stamp:?}: {reason}")]
    MalformedStamp {
        name: String,
        stamp: String,
        reason: String,
    },
}

fn random_id() -> u32 {
    rand::rng().random_range(ID_RANGE)
}

/// Name for a freshly provisioned, unclaimed member.
pub fn member_name(prefix: &str) -> String {
    format!("{prefix}-{}{STATUS_SEPARATOR}{NEW_STATUS}", random_id())
}

pub fn volume_name(prefix: &str) -> String {
    format!("{prefix}-volume-{}", random_id())
}

fn format_stamp(expiry: NaiveDateTime) -> String {
    expiry
        .format(STAMP_FORMAT)
        .to_string()
        .replace(' ', STAMP_SEPARATOR)
        .replace(':', ".")
}

/// The name a member carries once claimed until `expiry`.
pub fn encode_claim(base: &str, expiry: NaiveDateTime) -> String {
    let base = base.trim_start_matches('/');
    let claimed = base.replacen(
        &format!("{STATUS_SEPARATOR}{NEW_STATUS}"),
        &format!("{STATUS_SEPARATOR}{ALLOCATED_STATUS}"),
        1,
    );
    format!("{claimed}{STAMP_SEPARATOR}{}", format_stamp(expiry))
}

pub fn decode_expiry(name: &str) -> Result<NaiveDateTime, NameError> {
    let segment = name
        .split(STATUS_SEPARATOR)
        .nth(1)
        .ok_or_else(|| NameError::MissingSegment {
            name: name.to_string(),
        })?;

    let stamp = segment
        .replacen(STAMP_SEPARATOR, " ", 1)
        .replace('.', ":")
        .replace(ALLOCATED_STATUS, "");
    let stamp = stamp.trim();

    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).map_err(|e| NameError::MalformedStamp {
        name: name.to_string(),
        stamp: stamp.to_string(),
        reason: e.to_string(),
    })
}

pub fn derive_status(name: &str) -> MemberStatus {
    if name.contains(&format!("{STATUS_SEPARATOR}{ALLOCATED_STATUS}")) {
        MemberStatus::Allocated
    } else {
        MemberStatus::New
    }
}

/// True for names still carrying the `new` marker.
pub fn is_unclaimed(name: &str) -> bool {
    derive_status(name) == MemberStatus::New
        && name.contains(&format!("{STATUS_SEPARATOR}{NEW_STATUS}"))
}
