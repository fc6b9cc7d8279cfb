// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cron schedule fields.
//!
//! Each of the five cron schedule dimensions is represented by a
//! [`CronField`] parameterized over a [`CronUnit`]. The unit fixes the
//! inclusive value range, the names used in descriptions, and any special
//! normalization such as the Sunday folding of [`DayOfWeek`].
//!
//! # Token Grammar
//!
//! A field token is a comma separated list of elements. Each element is one
//! of:
//!
//! - `*` for every value in range.
//! - `a` for a single value.
//! - `a-b` for an inclusive range.
//!
//! Any element may carry a `/n` suffix meaning every n-th value of the
//! element, starting at its first value. A bare `a/n` runs from `a` to the
//! end of the field. Month and day of week units also accept three letter
//! names, e.g., `jan` or `mon`.

use crate::cron::list_join;

use std::{
    borrow::Cow,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    hash::Hash,
    marker::PhantomData,
    str::FromStr,
};

/// Unit of a cron field.
///
/// Describes the value range and naming of one schedule dimension.
pub trait CronUnit: Copy + Debug + Default + Eq + Hash + Send + Sync + 'static {
    /// Smallest value of the unit.
    const MINIMUM: u8;

    /// Largest value of the unit.
    const MAXIMUM: u8;

    /// Number of distinct values the unit can hold.
    const SIZE: u8 = Self::MAXIMUM - Self::MINIMUM + 1;

    /// Phrase used to describe a field with every value enabled.
    const EVERY: &'static str;

    /// Name of the unit for error reporting.
    const LABEL: &'static str;

    /// Display name of a value.
    fn name(value: u8) -> Cow<'static, str> {
        Cow::Owned(value.to_string())
    }

    /// Value of a named token, e.g., `jan` for months.
    fn alias(_token: &str) -> Option<u8> {
        None
    }

    /// Normalize raw bit set after parsing or mutation.
    fn fold(bits: u64) -> u64 {
        bits
    }
}

/// Minutes of the hour, 0 through 59.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Minute;

impl CronUnit for Minute {
    const MINIMUM: u8 = 0;
    const MAXIMUM: u8 = 59;
    const EVERY: &'static str = "every minute";
    const LABEL: &'static str = "minute";
}

/// Hours of the day, 0 through 23.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hour;

impl CronUnit for Hour {
    const MINIMUM: u8 = 0;
    const MAXIMUM: u8 = 23;
    const EVERY: &'static str = "every hour";
    const LABEL: &'static str = "hour";
}

/// Days of the month, 1 through 31.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayOfMonth;

impl CronUnit for DayOfMonth {
    const MINIMUM: u8 = 1;
    const MAXIMUM: u8 = 31;
    const EVERY: &'static str = "every day";
    const LABEL: &'static str = "day of month";

    fn name(value: u8) -> Cow<'static, str> {
        Cow::Borrowed(DAY_OF_MONTH_NAMES[usize::from(value)])
    }
}

/// Months of the year, 1 through 12.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Month;

impl CronUnit for Month {
    const MINIMUM: u8 = 1;
    const MAXIMUM: u8 = 12;
    const EVERY: &'static str = "every month";
    const LABEL: &'static str = "month";

    fn name(value: u8) -> Cow<'static, str> {
        Cow::Borrowed(MONTH_NAMES[usize::from(value)])
    }

    fn alias(token: &str) -> Option<u8> {
        lookup_alias(&MONTH_NAMES[1..], token).map(|index| index + 1)
    }
}

/// Days of the week, 0 through 7 with Sunday stored as 7.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayOfWeek;

impl DayOfWeek {
    /// Full name of a day of the week.
    pub fn long_name(value: u8) -> &'static str {
        DAY_OF_WEEK_LONG_NAMES[usize::from(value)]
    }
}

impl CronUnit for DayOfWeek {
    const MINIMUM: u8 = 0;
    const MAXIMUM: u8 = 7;
    const SIZE: u8 = 7;
    const EVERY: &'static str = "every day";
    const LABEL: &'static str = "day of week";

    fn name(value: u8) -> Cow<'static, str> {
        Cow::Borrowed(DAY_OF_WEEK_NAMES[usize::from(value)])
    }

    fn alias(token: &str) -> Option<u8> {
        lookup_alias(&DAY_OF_WEEK_LONG_NAMES[..7], token)
    }

    // INVARIANT: Sunday is 7, never 0.
    fn fold(bits: u64) -> u64 {
        if bits & 1 == 1 {
            (bits & !1) | (1 << 7)
        } else {
            bits
        }
    }
}

static MONTH_NAMES: [&str; 13] = [
    "",
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static DAY_OF_WEEK_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

static DAY_OF_WEEK_LONG_NAMES: [&str; 8] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

static DAY_OF_MONTH_NAMES: [&str; 32] = [
    "", "1st", "2nd", "3rd", "4th", "5th", "6th", "7th", "8th", "9th", "10th", "11th", "12th",
    "13th", "14th", "15th", "16th", "17th", "18th", "19th", "20th", "21st", "22nd", "23rd", "24th",
    "25th", "26th", "27th", "28th", "29th", "30th", "31st",
];

fn lookup_alias(names: &[&str], token: &str) -> Option<u8> {
    if token.len() != 3 {
        return None;
    }

    names
        .iter()
        .position(|name| name[..3].eq_ignore_ascii_case(token))
        .and_then(|index| u8::try_from(index).ok())
}

/// Minute field.
pub type Minutes = CronField<Minute>;

/// Hour field.
pub type Hours = CronField<Hour>;

/// Day of month field.
pub type DaysOfMonth = CronField<DayOfMonth>;

/// Month field.
pub type Months = CronField<Month>;

/// Day of week field.
pub type DaysOfWeek = CronField<DayOfWeek>;

/// Fixed-range set of enabled values for one cron unit.
///
/// Backed by a single 64-bit word indexed by value, which is wide enough for
/// every unit. An empty field is legal, and means the field is unset.
///
/// # Invariant
///
/// - Only bits inside `[U::MINIMUM, U::MAXIMUM]` are ever set.
/// - Bits are normalized through [`CronUnit::fold`] after every change.
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CronField<U: CronUnit> {
    bits: u64,
    unit: PhantomData<U>,
}

impl<U: CronUnit> CronField<U> {
    /// Construct new field with no values enabled.
    pub fn new() -> Self {
        Self::from_bits(0)
    }

    /// Construct new field with every value enabled.
    pub fn all() -> Self {
        let mut field = Self::new();
        field.enable_all();
        field
    }

    fn from_bits(bits: u64) -> Self {
        Self {
            bits: U::fold(bits),
            unit: PhantomData,
        }
    }

    /// Smallest value of the field.
    pub fn minimum(&self) -> u8 {
        U::MINIMUM
    }

    /// Largest value of the field.
    pub fn maximum(&self) -> u8 {
        U::MAXIMUM
    }

    /// Check if value is enabled.
    ///
    /// # Panics
    ///
    /// - Will panic if `value` lies outside of the field's range.
    pub fn is_enabled(&self, value: u8) -> bool {
        self.bits & Self::bit(value) != 0
    }

    /// Enable or disable a value.
    ///
    /// # Panics
    ///
    /// - Will panic if `value` lies outside of the field's range.
    pub fn set_enabled(&mut self, value: u8, enabled: bool) {
        let bit = Self::bit(value);
        let bits = if enabled {
            self.bits | bit
        } else {
            self.bits & !bit
        };
        self.bits = U::fold(bits);
    }

    /// Number of enabled values.
    pub fn enabled_count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Check if no value is enabled.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Check if every value is enabled.
    pub fn is_all(&self) -> bool {
        self.enabled_count() == u32::from(U::SIZE)
    }

    /// Disable every value.
    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Enable every value.
    pub fn enable_all(&mut self) {
        let bits = (U::MINIMUM..=U::MAXIMUM).fold(0, |bits, value| bits | (1u64 << value));
        self.bits = U::fold(bits);
    }

    /// Iterate through enabled values in ascending order.
    pub fn values(&self) -> impl Iterator<Item = u8> + '_ {
        (U::MINIMUM..=U::MAXIMUM).filter(|value| self.bits & (1u64 << value) != 0)
    }

    /// Determine uniform stride of enabled values.
    ///
    /// Returns the step `n` when the enabled values are exactly the values
    /// `minimum, minimum + n, minimum + 2n, ...` up to the end of the range.
    /// A field with only its minimum enabled has a stride equal to its size.
    pub fn stride(&self) -> Option<u8> {
        let values = self.values().collect::<Vec<_>>();
        let (&first, rest) = values.split_first()?;
        if first != U::MINIMUM {
            return None;
        }

        let step = match rest.first() {
            Some(&second) => second - first,
            None => U::SIZE,
        };
        let uniform = values.windows(2).all(|pair| pair[1] - pair[0] == step);
        let last = values.last().copied().unwrap_or(first);
        let covers_range = u16::from(last) + u16::from(step) > u16::from(U::MAXIMUM);

        (uniform && covers_range).then_some(step)
    }

    /// Describe enabled values in human readable form.
    ///
    /// A field with every value enabled is described with the unit's "every"
    /// phrase. Otherwise the names of each enabled value are listed.
    pub fn describe(&self) -> String {
        if self.is_all() {
            return U::EVERY.to_string();
        }

        list_join(self.values().map(U::name))
    }

    fn bit(value: u8) -> u64 {
        assert!(
            (U::MINIMUM..=U::MAXIMUM).contains(&value),
            "{} value {value} outside of range {}-{}",
            U::LABEL,
            U::MINIMUM,
            U::MAXIMUM
        );
        1u64 << value
    }
}

impl<U: CronUnit> FromStr for CronField<U> {
    type Err = FieldError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        if token.is_empty() {
            return Err(FieldError::malformed::<U>(token, "empty token"));
        }

        let mut bits = 0;
        for element in token.split(',') {
            bits |= parse_element::<U>(element)
                .map_err(|reason| FieldError::malformed::<U>(token, reason))?;
        }

        Ok(Self::from_bits(bits))
    }
}

fn parse_element<U: CronUnit>(element: &str) -> Result<u64, String> {
    let (range, step) = match element.split_once('/') {
        Some((range, step)) => {
            let step = step
                .parse::<u8>()
                .map_err(|_| format!("invalid step {step:?}"))?;
            if step == 0 {
                return Err("step must be positive".into());
            }
            (range, Some(step))
        }
        None => (element, None),
    };

    let (begin, end) = if range == "*" {
        (U::MINIMUM, U::MAXIMUM)
    } else if let Some((begin, end)) = range.split_once('-') {
        (parse_value::<U>(begin)?, parse_value::<U>(end)?)
    } else {
        let begin = parse_value::<U>(range)?;
        match step {
            Some(_) => (begin, U::MAXIMUM),
            None => (begin, begin),
        }
    };

    if begin > end {
        return Err(format!("reversed range {begin}-{end}"));
    }

    let step = usize::from(step.unwrap_or(1));
    Ok((begin..=end)
        .step_by(step)
        .fold(0, |bits, value| bits | (1u64 << value)))
}

fn parse_value<U: CronUnit>(text: &str) -> Result<u8, String> {
    if text.is_empty() {
        return Err("missing value".into());
    }

    let value = match U::alias(text) {
        Some(value) => value,
        None => text
            .parse::<u8>()
            .map_err(|_| format!("invalid value {text:?}"))?,
    };

    if !(U::MINIMUM..=U::MAXIMUM).contains(&value) {
        return Err(format!(
            "value {value} out of range {}-{}",
            U::MINIMUM,
            U::MAXIMUM
        ));
    }

    Ok(value)
}

/// Export field as the shortest equivalent token.
///
/// Every value enabled becomes `*`, an exact stride from the minimum becomes
/// `*/n`, and anything else becomes a comma list where runs of three or more
/// values are compacted into ranges. An empty field exports as nothing.
impl<U: CronUnit> Display for CronField<U> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.is_empty() {
            return Ok(());
        }

        if self.is_all() {
            return fmt.write_str("*");
        }

        if let Some(step) = self.stride() {
            if self.enabled_count() > 1 {
                return write!(fmt, "*/{step}");
            }
        }

        let mut runs: Vec<(u8, u8)> = Vec::new();
        for value in self.values() {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == value => *end = value,
                _ => runs.push((value, value)),
            }
        }

        let elements = runs
            .into_iter()
            .flat_map(|(begin, end)| match end - begin {
                0 => vec![begin.to_string()],
                1 => vec![begin.to_string(), end.to_string()],
                _ => vec![format!("{begin}-{end}")],
            })
            .collect::<Vec<_>>();

        fmt.write_str(&elements.join(","))
    }
}

impl<U: CronUnit> Debug for CronField<U> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "CronField<{}>({self})", U::LABEL)
    }
}

/// Field parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// Token does not follow the cron field grammar.
    #[error("malformed {unit} field {token:?}: {reason}")]
    Malformed {
        unit: &'static str,
        token: String,
        reason: String,
    },
}

impl FieldError {
    fn malformed<U: CronUnit>(token: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            unit: U::LABEL,
            token: token.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("*", "*"; "wildcard")]
    #[test_case("*/15", "*/15"; "wildcard stride")]
    #[test_case("0,15,30,45", "*/15"; "stride written as list")]
    #[test_case("5", "5"; "single value")]
    #[test_case("1-5,7", "1-5,7"; "range and value")]
    #[test_case("1,2,3,10,11", "1-3,10,11"; "runs compacted")]
    #[test_case("10-20/5", "10,15,20"; "stepped range")]
    #[test_case("50/5", "50,55"; "value with step runs to end")]
    #[test_case("0", "0"; "minimum only")]
    #[test]
    fn minute_token_export(token: &str, expect: &str) -> anyhow::Result<()> {
        let field: Minutes = token.parse()?;
        assert_eq!(field.to_string(), expect);
        Ok(())
    }

    #[test_case(""; "empty")]
    #[test_case("60"; "above range")]
    #[test_case("5-1"; "reversed range")]
    #[test_case("*/0"; "zero step")]
    #[test_case("1,,2"; "empty element")]
    #[test_case("abc"; "garbage")]
    #[test_case("1-"; "open range")]
    #[test]
    fn minute_token_malformed(token: &str) {
        let result = token.parse::<Minutes>();
        assert!(matches!(result, Err(FieldError::Malformed { .. })));
    }

    #[test]
    fn month_and_weekday_names_accepted() -> anyhow::Result<()> {
        let months: Months = "jan,MAR-may".parse()?;
        assert_eq!(months.values().collect::<Vec<_>>(), vec![1, 3, 4, 5]);

        let days: DaysOfWeek = "mon-fri".parse()?;
        assert_eq!(days.values().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

        Ok(())
    }

    #[test_case("0"; "sunday as zero")]
    #[test_case("7"; "sunday as seven")]
    #[test_case("0,7"; "sunday twice")]
    #[test_case("*"; "wildcard")]
    #[test_case("*/2"; "even days")]
    #[test_case("0-3"; "range from zero")]
    #[test_case("sun"; "name")]
    #[test]
    fn day_of_week_never_stores_zero(token: &str) -> anyhow::Result<()> {
        let days: DaysOfWeek = token.parse()?;
        assert!(!days.is_enabled(0));

        let reparsed: DaysOfWeek = days.to_string().parse()?;
        assert!(!reparsed.is_enabled(0));
        assert_eq!(reparsed, days);

        Ok(())
    }

    #[test]
    fn day_of_week_folds_on_mutation() {
        let mut days = DaysOfWeek::new();
        days.set_enabled(0, true);
        assert!(!days.is_enabled(0));
        assert!(days.is_enabled(7));
        assert_eq!(days.enabled_count(), 1);
    }

    #[test]
    fn day_of_week_wildcard_is_every_day() -> anyhow::Result<()> {
        let days: DaysOfWeek = "*".parse()?;
        assert_eq!(days.enabled_count(), 7);
        assert!(days.is_all());
        assert_eq!(days.to_string(), "*");
        assert_eq!(days.describe(), "every day");

        Ok(())
    }

    #[test]
    fn describe_every_value() {
        assert_eq!(Months::all().describe(), "every month");
        assert_eq!(DaysOfMonth::all().describe(), "every day");
        assert_eq!(Minutes::all().describe(), "every minute");
        assert_eq!(Hours::all().describe(), "every hour");
    }

    #[test]
    fn describe_single_value_has_no_conjunction() -> anyhow::Result<()> {
        let months: Months = "3".parse()?;
        assert_eq!(months.describe(), "March");

        let days: DaysOfMonth = "22".parse()?;
        assert_eq!(days.describe(), "22nd");

        Ok(())
    }

    #[test]
    fn describe_lists_names() -> anyhow::Result<()> {
        let days: DaysOfWeek = "1,3,0".parse()?;
        assert_eq!(days.describe(), "Mon, Wed, and Sun");

        let months: Months = "6,12".parse()?;
        assert_eq!(months.describe(), "June and December");

        Ok(())
    }

    #[test]
    fn stride_detection() -> anyhow::Result<()> {
        assert_eq!("*/15".parse::<Minutes>()?.stride(), Some(15));
        assert_eq!("0".parse::<Minutes>()?.stride(), Some(60));
        assert_eq!("*".parse::<Minutes>()?.stride(), Some(1));
        assert_eq!("0,15,30".parse::<Minutes>()?.stride(), None);
        assert_eq!("5,10".parse::<Minutes>()?.stride(), None);
        assert_eq!(Minutes::new().stride(), None);

        Ok(())
    }

    #[test]
    fn empty_field_is_legal() {
        let mut field = Hours::all();
        field.clear();
        assert!(field.is_empty());
        assert_eq!(field.to_string(), "");
        assert_eq!(field.describe(), "");
    }

    #[test]
    #[should_panic]
    fn out_of_range_access_panics() {
        let field = DaysOfMonth::new();
        field.is_enabled(0);
    }

    #[test]
    fn day_of_week_fold_holds_for_every_selection() -> anyhow::Result<()> {
        for value in 0..=7u8 {
            let field: DaysOfWeek = value.to_string().parse()?;
            assert!(!field.is_enabled(0), "{value} stored as zero");
            assert_eq!(field.is_enabled(7), value == 0 || value == 7, "{value}");
            assert_eq!(field.to_string().parse::<DaysOfWeek>()?, field, "{value}");
        }

        for mask in 1..=u8::MAX {
            let mut field = DaysOfWeek::new();
            for value in (0..=7u8).filter(|value| mask & (1 << value) != 0) {
                field.set_enabled(value, true);
            }

            let sunday = mask & 0b1000_0001 != 0;
            assert!(!field.is_enabled(0), "{mask:#010b}");
            assert_eq!(field.is_enabled(7), sunday, "{mask:#010b}");
            assert_eq!(field.to_string().parse::<DaysOfWeek>()?, field, "{mask:#010b}");
        }

        Ok(())
    }
}
