//! Scheduler rules attached to notebooks and clusters.
//!
//! A rule is evaluated once a minute. Times are local to the rule's `timezone_offset`, and a rule
//! fires when the current local minute equals its configured time.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SchedulerJobData {
    /// First day the rule is active
    #[schema(value_type = Option<String>, format = Date)]
    pub begin_date: Option<NaiveDate>,
    /// Last day the rule is active
    #[schema(value_type = Option<String>, format = Date)]
    pub finish_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, example = "09:00:00")]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>, example = "18:00:00")]
    pub end_time: Option<NaiveTime>,
    #[schema(value_type = Vec<String>, example = json!(["Mon", "Tue"]))]
    pub start_days_repeat: Vec<Weekday>,
    #[schema(value_type = Vec<String>, example = json!(["Mon", "Tue"]))]
    pub stop_days_repeat: Vec<Weekday>,
    /// UTC offset of the local times, `+HH:MM` or `-HH:MM`
    pub timezone_offset: String,
    /// Local date and time at which the resource is terminated
    #[schema(value_type = Option<String>, format = DateTime)]
    pub terminate_datetime: Option<NaiveDateTime>,
    /// Start the notebook's Spark clusters together with the notebook
    pub sync_start_required: bool,
    /// Stop the resource once it has been idle for `max_inactivity` minutes
    pub check_inactivity_required: bool,
    pub max_inactivity: Option<i64>,
}

impl Default for SchedulerJobData {
    fn default() -> Self {
        Self {
            begin_date: None,
            finish_date: None,
            start_time: None,
            end_time: None,
            start_days_repeat: Vec::new(),
            stop_days_repeat: Vec::new(),
            timezone_offset: "+00:00".to_string(),
            terminate_datetime: None,
            sync_start_required: false,
            check_inactivity_required: false,
            max_inactivity: None,
        }
    }
}

/// Parse `+HH:MM` / `-HH:MM` into a fixed offset.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.trim().split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(t)
}

impl SchedulerJobData {
    /// Returns every problem with the rule; empty when the rule is usable.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if parse_offset(&self.timezone_offset).is_none() {
            errors.push(format!("timezone_offset '{}' is not of the form +HH:MM", self.timezone_offset));
        }
        if let (Some(begin), Some(finish)) = (self.begin_date, self.finish_date)
            && begin > finish
        {
            errors.push("begin_date must not be after finish_date".to_string());
        }
        if self.start_time.is_some() && self.start_days_repeat.is_empty() {
            errors.push("start_days_repeat is required when start_time is set".to_string());
        }
        if self.end_time.is_some() && self.stop_days_repeat.is_empty() && !self.check_inactivity_required {
            errors.push("stop_days_repeat is required when end_time is set".to_string());
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && truncate_to_minute(start) == truncate_to_minute(end)
        {
            errors.push("start_time and end_time must differ".to_string());
        }
        if self.check_inactivity_required && self.max_inactivity.is_none_or(|m| m <= 0) {
            errors.push("max_inactivity must be a positive number of minutes".to_string());
        }
        errors
    }

    fn local(&self, now: DateTime<Utc>) -> Option<NaiveDateTime> {
        let offset = parse_offset(&self.timezone_offset)?;
        Some(now.with_timezone(&offset).naive_local())
    }

    fn within_dates(&self, date: NaiveDate) -> bool {
        self.begin_date.is_none_or(|begin| date >= begin) && self.finish_date.is_none_or(|finish| date <= finish)
    }

    fn fires(&self, now: DateTime<Utc>, time: Option<NaiveTime>, days: &[Weekday]) -> bool {
        let (Some(time), Some(local)) = (time, self.local(now)) else {
            return false;
        };
        self.within_dates(local.date())
            && days.contains(&local.weekday())
            && truncate_to_minute(local.time()) == truncate_to_minute(time)
    }

    pub fn should_start(&self, now: DateTime<Utc>) -> bool {
        self.fires(now, self.start_time, &self.start_days_repeat)
    }

    /// Stop at `end_time`, or once idle longer than `max_inactivity` when inactivity checks are on.
    pub fn should_stop(&self, now: DateTime<Utc>, last_activity: Option<DateTime<Utc>>) -> bool {
        if self.fires(now, self.end_time, &self.stop_days_repeat) {
            return true;
        }
        match (self.check_inactivity_required, self.max_inactivity, last_activity) {
            (true, Some(minutes), Some(last)) if minutes > 0 => now - last >= Duration::minutes(minutes),
            _ => false,
        }
    }

    pub fn should_terminate(&self, now: DateTime<Utc>) -> bool {
        let (Some(at), Some(local)) = (self.terminate_datetime, self.local(now)) else {
            return false;
        };
        local.date() == at.date() && truncate_to_minute(local.time()) == truncate_to_minute(at.time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekday_rule() -> SchedulerJobData {
        SchedulerJobData {
            start_time: NaiveTime::from_hms_opt(9, 0, 0),
            end_time: NaiveTime::from_hms_opt(18, 30, 0),
            start_days_repeat: vec![Weekday::Mon, Weekday::Tue],
            stop_days_repeat: vec![Weekday::Mon, Weekday::Tue],
            timezone_offset: "+02:00".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+02:00"), FixedOffset::east_opt(7200));
        assert_eq!(parse_offset("-05:30"), FixedOffset::east_opt(-(5 * 3600 + 30 * 60)));
        assert_eq!(parse_offset("02:00"), None);
        assert_eq!(parse_offset("+25:00"), None);
        assert_eq!(parse_offset(""), None);
    }

    #[test]
    fn test_start_matches_local_minute() {
        let rule = weekday_rule();
        // Monday 2024-01-08 07:00:30 UTC is 09:00:30 at +02:00
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 7, 0, 30).unwrap();
        assert!(rule.should_start(monday));
        assert!(!rule.should_start(monday + Duration::minutes(1)));
        // Wednesday is not in the repeat list
        assert!(!rule.should_start(monday + Duration::days(2)));
    }

    #[test]
    fn test_stop_at_end_time() {
        let rule = weekday_rule();
        let tuesday_evening = Utc.with_ymd_and_hms(2024, 1, 9, 16, 30, 0).unwrap();
        assert!(rule.should_stop(tuesday_evening, None));
        assert!(!rule.should_stop(tuesday_evening - Duration::hours(1), None));
    }

    #[test]
    fn test_stop_on_inactivity() {
        let rule = SchedulerJobData {
            check_inactivity_required: true,
            max_inactivity: Some(120),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        assert!(rule.should_stop(now, Some(now - Duration::minutes(121))));
        assert!(!rule.should_stop(now, Some(now - Duration::minutes(30))));
        assert!(!rule.should_stop(now, None));
    }

    #[test]
    fn test_date_window() {
        let rule = SchedulerJobData {
            begin_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..weekday_rule()
        };
        let before_window = Utc.with_ymd_and_hms(2024, 1, 8, 7, 0, 0).unwrap();
        assert!(!rule.should_start(before_window));
    }

    #[test]
    fn test_terminate_datetime() {
        let rule = SchedulerJobData {
            terminate_datetime: NaiveDate::from_ymd_opt(2024, 3, 1).and_then(|d| d.and_hms_opt(20, 15, 0)),
            timezone_offset: "-01:00".to_string(),
            ..Default::default()
        };
        assert!(rule.should_terminate(Utc.with_ymd_and_hms(2024, 3, 1, 21, 15, 59).unwrap()));
        assert!(!rule.should_terminate(Utc.with_ymd_and_hms(2024, 3, 1, 20, 15, 0).unwrap()));
    }

    #[test]
    fn test_validation_errors() {
        assert!(weekday_rule().validation_errors().is_empty());

        let bad = SchedulerJobData {
            start_time: NaiveTime::from_hms_opt(9, 0, 0),
            end_time: NaiveTime::from_hms_opt(9, 0, 0),
            stop_days_repeat: vec![Weekday::Fri],
            timezone_offset: "CET".to_string(),
            begin_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            finish_date: NaiveDate::from_ymd_opt(2024, 4, 1),
            check_inactivity_required: true,
            max_inactivity: Some(0),
            ..Default::default()
        };
        assert_eq!(bad.validation_errors().len(), 5);
    }

    #[test]
    fn test_weekdays_deserialize_from_names() {
        let rule: SchedulerJobData = serde_json::from_str(r#"{"start_days_repeat": ["Mon", "friday"], "start_time": "08:15:00"}"#).unwrap();
        assert_eq!(rule.start_days_repeat, vec![Weekday::Mon, Weekday::Fri]);
        assert_eq!(rule.timezone_offset, "+00:00");
    }
}
