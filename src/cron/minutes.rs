// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Minute selection display policy.
//!
//! Sixty individual minute toggles are a lot to show at once. When every
//! selected minute lies on a five minute step, only the twelve multiples of
//! five need to be shown. These functions derive that decision, and the
//! named preselection matching a selection, purely from the minute field.
//!
//! Changing the display mode never alters the selection. Only applying a
//! preselection replaces it.

use crate::cron::field::Minutes;

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Step between minutes shown in reduced display.
pub const REDUCED_MINUTE_STEP: u8 = 5;

/// How the minute field should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinuteDisplay {
    /// Show only multiples of [`REDUCED_MINUTE_STEP`].
    Reduced,

    /// Show all sixty minutes.
    Expanded,
}

impl MinuteDisplay {
    /// Determine display mode for a minute selection.
    pub fn for_minutes(minutes: &Minutes) -> Self {
        if can_reduce(minutes) {
            Self::Reduced
        } else {
            Self::Expanded
        }
    }

    /// Minutes that should be shown in this display mode.
    pub fn visible_minutes(self) -> impl Iterator<Item = u8> {
        let step = match self {
            Self::Reduced => REDUCED_MINUTE_STEP,
            Self::Expanded => 1,
        };

        (0..60).step_by(usize::from(step))
    }
}

/// Check if minute selection fits the reduced display.
///
/// An empty selection is reducible.
pub fn can_reduce(minutes: &Minutes) -> bool {
    minutes
        .values()
        .all(|minute| minute % REDUCED_MINUTE_STEP == 0)
}

/// Flip one minute, and re-derive the display mode.
///
/// # Panics
///
/// - Will panic if `minute` is not within 0 through 59.
pub fn toggle_minute(minutes: &mut Minutes, minute: u8) -> MinuteDisplay {
    let enabled = minutes.is_enabled(minute);
    minutes.set_enabled(minute, !enabled);
    MinuteDisplay::for_minutes(minutes)
}

/// Named shortcut for common minute selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinutePreselection {
    Clear,
    Custom,
    OnTheHour,
    Every15,
    Every30,
}

impl MinutePreselection {
    /// Every preselection in menu order.
    pub const ALL: [Self; 5] = [
        Self::Clear,
        Self::Custom,
        Self::OnTheHour,
        Self::Every15,
        Self::Every30,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::Custom => "Custom",
            Self::OnTheHour => "On the hour",
            Self::Every15 => "Every 15 minutes",
            Self::Every30 => "Every 30 minutes",
        }
    }

    /// Minute step enabled by preselection.
    ///
    /// [`Clear`](Self::Clear) and [`Custom`](Self::Custom) have no step.
    pub fn step(self) -> Option<u8> {
        match self {
            Self::Clear | Self::Custom => None,
            Self::OnTheHour => Some(60),
            Self::Every15 => Some(15),
            Self::Every30 => Some(30),
        }
    }

    /// Apply preselection to minute selection.
    ///
    /// Clearing disables every minute. Custom leaves the selection alone.
    /// Any other preselection replaces the selection with every n-th minute
    /// starting at zero. Returns the display mode of the result.
    pub fn apply(self, minutes: &mut Minutes) -> MinuteDisplay {
        match self {
            Self::Custom => {}
            Self::Clear => minutes.clear(),
            _ => {
                minutes.clear();
                let step = self.step().unwrap_or(60);
                for minute in (0..60).step_by(usize::from(step)) {
                    minutes.set_enabled(minute, true);
                }
            }
        }

        MinuteDisplay::for_minutes(minutes)
    }

    /// Find preselection matching minute selection.
    ///
    /// Falls back to [`Custom`](Self::Custom) when no stepped preselection
    /// produces the selection.
    pub fn for_minutes(minutes: &Minutes) -> Self {
        if minutes.is_empty() {
            return Self::Clear;
        }

        let stride = minutes.stride();
        Self::ALL
            .into_iter()
            .find(|preselection| preselection.step().is_some() && preselection.step() == stride)
            .unwrap_or(Self::Custom)
    }
}

impl Display for MinutePreselection {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("0,5,10,55", MinuteDisplay::Reduced; "multiples of five")]
    #[test_case("*/15", MinuteDisplay::Reduced; "quarter hours")]
    #[test_case("0,7", MinuteDisplay::Expanded; "off step minute")]
    #[test_case("*", MinuteDisplay::Expanded; "every minute")]
    #[test_case("59", MinuteDisplay::Expanded; "last minute")]
    #[test]
    fn display_mode_from_selection(token: &str, expect: MinuteDisplay) -> anyhow::Result<()> {
        let minutes: Minutes = token.parse()?;
        assert_eq!(MinuteDisplay::for_minutes(&minutes), expect);
        Ok(())
    }

    #[test]
    fn empty_selection_is_reducible() {
        assert!(can_reduce(&Minutes::new()));
        assert_eq!(
            MinuteDisplay::for_minutes(&Minutes::new()),
            MinuteDisplay::Reduced
        );
    }

    #[test]
    fn visible_minutes_per_mode() {
        let reduced = MinuteDisplay::Reduced.visible_minutes().collect::<Vec<_>>();
        assert_eq!(reduced, vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55]);
        assert_eq!(MinuteDisplay::Expanded.visible_minutes().count(), 60);
    }

    #[test]
    fn toggle_expands_then_reduces() {
        let mut minutes = Minutes::new();
        assert_eq!(toggle_minute(&mut minutes, 10), MinuteDisplay::Reduced);
        assert_eq!(toggle_minute(&mut minutes, 12), MinuteDisplay::Expanded);
        assert_eq!(toggle_minute(&mut minutes, 12), MinuteDisplay::Reduced);
        assert_eq!(minutes.values().collect::<Vec<_>>(), vec![10]);
    }

    #[test_case(MinutePreselection::Every15; "every 15")]
    #[test_case(MinutePreselection::Every30; "every 30")]
    #[test_case(MinutePreselection::OnTheHour; "on the hour")]
    #[test]
    fn preselection_round_trip(preselection: MinutePreselection) {
        let mut minutes: Minutes = Minutes::all();
        let mode = preselection.apply(&mut minutes);
        assert_eq!(mode, MinuteDisplay::Reduced);
        assert_eq!(MinutePreselection::for_minutes(&minutes), preselection);
    }

    #[test]
    fn clear_empties_selection() {
        let mut minutes: Minutes = Minutes::all();
        let mode = MinutePreselection::Clear.apply(&mut minutes);
        assert!(minutes.is_empty());
        assert_eq!(mode, MinuteDisplay::Reduced);
        assert_eq!(
            MinutePreselection::for_minutes(&minutes),
            MinutePreselection::Clear
        );
    }

    #[test]
    fn custom_keeps_selection() -> anyhow::Result<()> {
        let mut minutes: Minutes = "3,17".parse()?;
        let mode = MinutePreselection::Custom.apply(&mut minutes);
        assert_eq!(minutes.to_string(), "3,17");
        assert_eq!(mode, MinuteDisplay::Expanded);
        assert_eq!(
            MinutePreselection::for_minutes(&minutes),
            MinutePreselection::Custom
        );

        Ok(())
    }

    #[test]
    fn unmatched_stride_is_custom() -> anyhow::Result<()> {
        let minutes: Minutes = "*/20".parse()?;
        assert_eq!(
            MinutePreselection::for_minutes(&minutes),
            MinutePreselection::Custom
        );
        Ok(())
    }

    fn on_step_selection(mask: u16) -> Minutes {
        let mut minutes = Minutes::new();
        for slot in (0..12u8).filter(|slot| mask & (1 << slot) != 0) {
            minutes.set_enabled(slot * REDUCED_MINUTE_STEP, true);
        }
        minutes
    }

    #[test]
    fn every_on_step_selection_reduces_and_round_trips() -> anyhow::Result<()> {
        let reduced = MinuteDisplay::Reduced.visible_minutes().collect::<Vec<_>>();
        for mask in 0..1u16 << 12 {
            let minutes = on_step_selection(mask);
            assert!(can_reduce(&minutes), "{minutes}");
            assert_eq!(MinuteDisplay::for_minutes(&minutes), MinuteDisplay::Reduced);
            assert!(minutes.values().all(|minute| reduced.contains(&minute)));

            if !minutes.is_empty() {
                assert_eq!(minutes.to_string().parse::<Minutes>()?, minutes);
            }
        }

        Ok(())
    }

    #[test]
    fn any_off_step_minute_expands() {
        let off_step = (0..60u8)
            .filter(|minute| minute % REDUCED_MINUTE_STEP != 0)
            .collect::<Vec<_>>();
        for mask in 0..1u16 << 12 {
            let base = on_step_selection(mask);
            for &minute in &off_step {
                let mut minutes = base;
                assert_eq!(toggle_minute(&mut minutes, minute), MinuteDisplay::Expanded);
                assert!(!can_reduce(&minutes));
                assert_eq!(toggle_minute(&mut minutes, minute), MinuteDisplay::Reduced);
                assert_eq!(minutes, base);
            }
        }
    }

    #[test]
    fn preselection_lookup_for_every_on_step_selection() {
        let stepped = MinutePreselection::ALL
            .into_iter()
            .filter(|preselection| preselection.step().is_some())
            .map(|preselection| {
                let mut minutes = Minutes::new();
                preselection.apply(&mut minutes);
                (preselection, minutes)
            })
            .collect::<Vec<_>>();

        for mask in 0..1u16 << 12 {
            let minutes = on_step_selection(mask);
            let expect = if minutes.is_empty() {
                MinutePreselection::Clear
            } else {
                stepped
                    .iter()
                    .find(|(_, selection)| *selection == minutes)
                    .map_or(MinutePreselection::Custom, |(preselection, _)| *preselection)
            };
            assert_eq!(MinutePreselection::for_minutes(&minutes), expect, "{minutes}");

            let mut applied = minutes;
            MinutePreselection::Custom.apply(&mut applied);
            assert_eq!(applied, minutes);
        }
    }
}
