//! Canvas version manager — version chains of a single canvas element.
//!
//! DESIGN
//! ======
//! Every function takes the one `&mut CanvasElement` it changes and nothing
//! else; the conversation store owns lookup, persistence, and events.
//!
//! Version numbers are dense from 1 and never reused. Deleting a version
//! marks it `Deleted` in place instead of removing it, so `versions[n - 1]`
//! is always version `n` and at least one live version always remains.

use tracing::debug;

use crate::state::{CanvasElement, CanvasKind, Version, VersionContent, VersionState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("version {0} does not exist")]
    NotFound(u32),
    #[error("version {0} is deleted")]
    AlreadyDeleted(u32),
    #[error("cannot delete the only live version")]
    LastVersion,
    #[error("{content} content does not fit a {element} element")]
    KindMismatch { element: CanvasKind, content: CanvasKind },
    #[error("canvas element {element} is inconsistent: {rule}")]
    Inconsistent { element: String, rule: &'static str },
}

/// Build a new element whose first version holds `content`.
///
/// # Errors
///
/// Returns [`VersionError::KindMismatch`] if `content` is not of `kind`.
pub fn new_element(
    kind: CanvasKind,
    title: &str,
    content: VersionContent,
    request: &str,
    now: i64,
) -> Result<CanvasElement, VersionError> {
    ensure_kind(kind, &content)?;
    let title = match title.trim() {
        "" => format!("Untitled {kind}"),
        trimmed => trimmed.to_owned(),
    };
    Ok(CanvasElement {
        id: crate::state::local_id("canvas"),
        kind,
        title,
        versions: vec![Version {
            number: 1,
            content,
            state: VersionState::Typing,
            request: request.to_owned(),
            timestamp: now,
        }],
        current_version: 1,
        completed_versions: std::collections::BTreeSet::new(),
    })
}

/// Append a version and point the element at it.
///
/// # Errors
///
/// Returns [`VersionError::KindMismatch`] if `content` is not of the
/// element's kind.
pub fn add_version(
    element: &mut CanvasElement,
    content: VersionContent,
    request: &str,
    now: i64,
) -> Result<Version, VersionError> {
    ensure_kind(element.kind, &content)?;
    let number = u32::try_from(element.versions.len() + 1).unwrap_or(u32::MAX);
    let version = Version {
        number,
        content,
        state: VersionState::Typing,
        request: request.to_owned(),
        timestamp: now,
    };
    element.versions.push(version.clone());
    element.current_version = number;
    debug!(element = %element.id, number, "canvas version added");
    Ok(version)
}

/// Point the element at an earlier (or later) live version.
///
/// # Errors
///
/// Returns [`VersionError::NotFound`] or [`VersionError::AlreadyDeleted`].
pub fn rollback(element: &mut CanvasElement, number: u32) -> Result<(), VersionError> {
    live_version(element, number)?;
    element.current_version = number;
    Ok(())
}

/// Mark a version deleted. If it was current, the pointer moves to the
/// previous version, or the nearest live one from there.
///
/// # Errors
///
/// Returns [`VersionError::LastVersion`] when `number` is the only live
/// version, and [`VersionError::NotFound`] / [`VersionError::AlreadyDeleted`]
/// for versions that cannot be deleted.
pub fn delete_version(element: &mut CanvasElement, number: u32) -> Result<(), VersionError> {
    live_version(element, number)?;
    if element.live_count() <= 1 {
        return Err(VersionError::LastVersion);
    }

    if let Some(version) = element.version_mut(number) {
        version.state = VersionState::Deleted;
    }
    element.completed_versions.remove(&number);

    if element.current_version == number {
        let total = u32::try_from(element.versions.len()).unwrap_or(u32::MAX);
        let preferred = number.saturating_sub(1).max(1).min(total);
        if let Some(target) = nearest_live(element, preferred) {
            element.current_version = target;
        }
    }
    Ok(())
}

/// Advance one playback step: Draft, Typing, Frozen, Displayed. Reaching
/// Displayed marks the version completed. A displayed version stays put.
///
/// # Errors
///
/// Returns [`VersionError::NotFound`] or [`VersionError::AlreadyDeleted`].
pub fn advance_playback(element: &mut CanvasElement, number: u32) -> Result<VersionState, VersionError> {
    let state = live_version(element, number)?.state;
    let Some(next) = state.next() else {
        return Ok(state);
    };
    if let Some(version) = element.version_mut(number) {
        version.state = next;
    }
    if next == VersionState::Displayed {
        element.completed_versions.insert(number);
    }
    Ok(next)
}

/// Check the structural rules a persisted element must satisfy.
///
/// # Errors
///
/// Returns [`VersionError::Inconsistent`] naming the first broken rule.
pub fn check_invariants(element: &CanvasElement) -> Result<(), VersionError> {
    let broken = |rule| Err(VersionError::Inconsistent { element: element.id.clone(), rule });

    if element.versions.is_empty() {
        return broken("no versions");
    }
    let dense = element
        .versions
        .iter()
        .zip(1u32..)
        .all(|(version, expected)| version.number == expected);
    if !dense {
        return broken("version numbers are not dense from 1");
    }
    if element.versions.iter().any(|v| v.content.kind() != element.kind) {
        return broken("version content does not match element type");
    }
    match element.current() {
        None => return broken("current version out of range"),
        Some(v) if v.state == VersionState::Deleted => return broken("current version is deleted"),
        Some(_) => {}
    }
    let total = element.versions.len();
    if element
        .completed_versions
        .iter()
        .any(|n| *n == 0 || usize::try_from(*n).map_or(true, |n| n > total))
    {
        return broken("completed version out of range");
    }
    Ok(())
}

fn ensure_kind(kind: CanvasKind, content: &VersionContent) -> Result<(), VersionError> {
    if content.kind() == kind {
        Ok(())
    } else {
        Err(VersionError::KindMismatch { element: kind, content: content.kind() })
    }
}

fn live_version(element: &CanvasElement, number: u32) -> Result<&Version, VersionError> {
    let version = element.version(number).ok_or(VersionError::NotFound(number))?;
    if version.state == VersionState::Deleted {
        return Err(VersionError::AlreadyDeleted(number));
    }
    Ok(version)
}

/// Nearest live version at or below `from`, else the nearest above it.
fn nearest_live(element: &CanvasElement, from: u32) -> Option<u32> {
    let is_live = |n: &u32| element.version(*n).is_some_and(|v| v.state != VersionState::Deleted);
    let total = u32::try_from(element.versions.len()).unwrap_or(u32::MAX);
    (1..=from)
        .rev()
        .find(is_live)
        .or_else(|| (from + 1..=total).find(is_live))
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
