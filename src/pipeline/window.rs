//! Page windows and run ranges.
//!
//! All page numbers here are 1-indexed and inclusive.

use crate::config::{PageSelection, Placement};
use crate::error::DigitizeError;

/// Where the target page sits in an uploaded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetOffset {
    /// 1-based position of the target within the window.
    pub position: usize,
    pub window_len: usize,
}

impl TargetOffset {
    /// Offset of `target` in the window `first..=last`.
    pub fn within(target: usize, first: usize, last: usize) -> Self {
        Self {
            position: target.saturating_sub(first) + 1,
            window_len: last.saturating_sub(first) + 1,
        }
    }
}

/// The `(first, last)` pages uploaded together for `target`.
///
/// The window holds `min(window, total)` pages and always contains the
/// target. It is placed per `placement`, clamped to start at page 1, then
/// shifted left if it would run past the last page.
///
/// A window at least as long as the document returns the whole document
/// before the target is range-checked.
pub fn select_window(
    total: usize,
    target: usize,
    window: usize,
    placement: Placement,
) -> Result<(usize, usize), DigitizeError> {
    if window == 0 {
        return Err(DigitizeError::InvalidConfig("Page window must be ≥ 1".into()));
    }
    if window >= total {
        return Ok((1, total));
    }
    if target == 0 || target > total {
        return Err(DigitizeError::PageOutOfRange { page: target, total });
    }

    let lead = match placement {
        Placement::Top => 0,
        Placement::Middle => window / 2,
        Placement::Bottom => window - 1,
    };
    let mut first = target.saturating_sub(lead).max(1);
    if first + window - 1 > total {
        first = total - window + 1;
    }
    Ok((first, first + window - 1))
}

/// Check a run range against the document.
///
/// With `all_pages` the range is the whole document and the other
/// arguments are ignored.
pub fn validate(
    total: usize,
    all_pages: bool,
    start: usize,
    count: usize,
) -> Result<(usize, usize), DigitizeError> {
    if all_pages {
        return Ok((1, total));
    }
    if start == 0 {
        return Err(DigitizeError::PageOutOfRange { page: 0, total });
    }
    if count == 0 {
        return Err(DigitizeError::PageOutOfRange { page: start, total });
    }
    let end = start + count - 1;
    if end > total {
        return Err(DigitizeError::RangeExceedsDocument { start, end, total });
    }
    Ok((start, count))
}

/// [`validate`] for a typed selection. Returns `(start, count)`.
pub fn resolve_selection(
    total: usize,
    selection: &PageSelection,
) -> Result<(usize, usize), DigitizeError> {
    match *selection {
        PageSelection::All => validate(total, true, 0, 0),
        PageSelection::Range { start, count } => validate(total, false, start, count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLACEMENTS: [Placement; 3] = [Placement::Top, Placement::Middle, Placement::Bottom];

    #[test]
    fn window_bounds_hold_everywhere() {
        for total in 1..=12 {
            for window in 1..=14 {
                for target in 1..=total {
                    for placement in PLACEMENTS {
                        let (first, last) = select_window(total, target, window, placement).unwrap();
                        assert!(1 <= first && first <= target, "{total} {window} {target} {placement}");
                        assert!(target <= last && last <= total, "{total} {window} {target} {placement}");
                        assert_eq!(last - first + 1, window.min(total));
                    }
                }
            }
        }
    }

    #[test]
    fn wide_window_covers_document() {
        for placement in PLACEMENTS {
            assert_eq!(select_window(5, 3, 5, placement).unwrap(), (1, 5));
            assert_eq!(select_window(5, 1, 9, placement).unwrap(), (1, 5));
        }
    }

    #[test]
    fn wide_window_wins_over_target_range() {
        for placement in PLACEMENTS {
            assert_eq!(select_window(3, 5, 10, placement).unwrap(), (1, 3));
            assert_eq!(select_window(3, 0, 3, placement).unwrap(), (1, 3));
        }
        assert!(matches!(
            select_window(3, 5, 2, Placement::Top),
            Err(DigitizeError::PageOutOfRange { page: 5, total: 3 })
        ));
    }

    #[test]
    fn placement_positions_target() {
        assert_eq!(select_window(20, 10, 3, Placement::Top).unwrap(), (10, 12));
        assert_eq!(select_window(20, 10, 3, Placement::Middle).unwrap(), (9, 11));
        assert_eq!(select_window(20, 10, 4, Placement::Middle).unwrap(), (8, 11));
        assert_eq!(select_window(20, 10, 3, Placement::Bottom).unwrap(), (8, 10));
    }

    #[test]
    fn edges_clamp_and_shift() {
        assert_eq!(select_window(20, 1, 3, Placement::Bottom).unwrap(), (1, 3));
        assert_eq!(select_window(20, 20, 3, Placement::Top).unwrap(), (18, 20));
        assert_eq!(select_window(20, 19, 4, Placement::Middle).unwrap(), (17, 20));
    }

    #[test]
    fn target_outside_document_is_range_error() {
        assert!(matches!(
            select_window(10, 11, 1, Placement::Top),
            Err(DigitizeError::PageOutOfRange { page: 11, total: 10 })
        ));
        assert!(select_window(10, 0, 1, Placement::Top).is_err());
        assert!(matches!(
            select_window(10, 2, 0, Placement::Top),
            Err(DigitizeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn offset_follows_placement() {
        let (first, last) = select_window(20, 10, 3, Placement::Bottom).unwrap();
        assert_eq!(
            TargetOffset::within(10, first, last),
            TargetOffset { position: 3, window_len: 3 }
        );
        let (first, last) = select_window(20, 10, 3, Placement::Middle).unwrap();
        assert_eq!(TargetOffset::within(10, first, last).position, 2);
        let (first, last) = select_window(20, 20, 3, Placement::Top).unwrap();
        assert_eq!(TargetOffset::within(20, first, last).position, 3);
    }

    #[test]
    fn validate_checks_range_end() {
        assert!(matches!(
            validate(10, false, 8, 5),
            Err(DigitizeError::RangeExceedsDocument { start: 8, end: 12, total: 10 })
        ));
        assert_eq!(validate(10, false, 8, 3).unwrap(), (8, 3));
        assert_eq!(validate(10, true, 99, 99).unwrap(), (1, 10));
        assert!(validate(10, false, 0, 2).is_err());
        assert!(validate(10, false, 2, 0).is_err());
    }

    #[test]
    fn selection_resolves() {
        assert_eq!(resolve_selection(7, &PageSelection::All).unwrap(), (1, 7));
        assert_eq!(
            resolve_selection(7, &PageSelection::Range { start: 2, count: 3 }).unwrap(),
            (2, 3)
        );
    }
}
