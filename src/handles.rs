//! Editor handle naming.
//!
//! Every node exposes one dot per side, and each dot can start or end a
//! drag. Stored handles are always `<side>-source` on the source end and
//! `<side>-target` on the target end, whichever dot the user grabbed.

use std::fmt;

use anyhow::anyhow;

use crate::error::{LibError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSide {
    Top,
    Bottom,
    Left,
    Right,
}

impl HandleSide {
    pub const fn as_str(self) -> &'static str {
        match self {
            HandleSide::Top => "top",
            HandleSide::Bottom => "bottom",
            HandleSide::Left => "left",
            HandleSide::Right => "right",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "top" => Some(HandleSide::Top),
            "bottom" => Some(HandleSide::Bottom),
            "left" => Some(HandleSide::Left),
            "right" => Some(HandleSide::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRole {
    Source,
    Target,
}

impl HandleRole {
    pub const fn suffix(self) -> &'static str {
        match self {
            HandleRole::Source => "source",
            HandleRole::Target => "target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub side: HandleSide,
    pub role: HandleRole,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.side.as_str(), self.role.suffix())
    }
}

/// Parses `top`, `top-source` or `top-target` and rebinds the handle to the
/// role it actually plays in the edge.
pub fn normalize_handle(raw: &str, role: HandleRole) -> Result<Handle> {
    let normalized = raw.trim().to_ascii_lowercase();
    let side = normalized
        .strip_suffix("-source")
        .or_else(|| normalized.strip_suffix("-target"))
        .unwrap_or(&normalized);

    HandleSide::parse(side)
        .map(|side| Handle { side, role })
        .ok_or_else(|| {
            LibError::invalid_with_code(
                "invalid_handle",
                format!("Unknown connection handle '{}'", raw.trim()),
                anyhow!("handle '{}' does not name a node side", raw),
            )
        })
}

/// Rewrites both optional handles of a new edge to canonical names.
pub fn normalize_connection_handles(
    source: Option<&str>,
    target: Option<&str>,
) -> Result<(Option<String>, Option<String>)> {
    let source = source
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| normalize_handle(raw, HandleRole::Source))
        .transpose()?;
    let target = target
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| normalize_handle(raw, HandleRole::Target))
        .transpose()?;

    tracing::trace!(?source, ?target, "normalized connection handles");
    Ok((
        source.map(|handle| handle.to_string()),
        target.map(|handle| handle.to_string()),
    ))
}
