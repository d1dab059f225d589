//! Trigger interpretation: date, cron, and interval specifications.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{SchedulerError, SchedulerResult};
use crate::store::parse_run_date;

/// An interpreted job trigger.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Single shot at an instant.
    Date(DateTime<Utc>),
    /// Cron expression evaluated in a timezone.
    Cron(Box<Schedule>, Tz),
    /// Fixed period, first fire one period after registration.
    Interval(Duration),
}

/// Cron fields from most to least significant, with the minimum each
/// defaults to when a more significant field has been set.
const CRON_FIELDS: &[(&str, &str)] = &[
    ("month", "1"),
    ("day", "1"),
    ("day_of_week", "*"),
    ("hour", "0"),
    ("minute", "0"),
    ("second", "0"),
];

fn field(args: &Value, key: &str) -> Option<String> {
    match args.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a cron expression from named fields.
///
/// Omitted fields less significant than the least-significant explicitly
/// set field default to their minimum, and more significant ones to `*`,
/// so `{hour: 9}` means "daily at 09:00:00", not "every minute of the 9
/// o'clock hour". With no fields set at all, only the seconds field is
/// pinned (fires every minute).
fn cron_expression(args: &Value) -> String {
    let least_set = CRON_FIELDS
        .iter()
        .rposition(|(name, _)| field(args, name).is_some());
    let boundary = least_set.unwrap_or(CRON_FIELDS.len().saturating_sub(2));

    let mut resolved: HashMap<&str, String> = HashMap::new();
    for (i, (name, minimum)) in CRON_FIELDS.iter().enumerate() {
        let value = field(args, name).unwrap_or_else(|| {
            if i > boundary {
                (*minimum).to_string()
            } else {
                "*".to_string()
            }
        });
        resolved.insert(*name, value);
    }

    format!(
        "{} {} {} {} {} {}",
        resolved["second"],
        resolved["minute"],
        resolved["hour"],
        resolved["day"],
        resolved["month"],
        resolved["day_of_week"],
    )
}

fn num_field(args: &Value, key: &str) -> f64 {
    match args.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

impl Trigger {
    /// Interpret a persisted trigger specification.
    ///
    /// Cron arguments use the familiar field names (`minute`, `hour`,
    /// `day`, `month`, `day_of_week`, optionally `second`); omitted fields
    /// below the least-significant set one default to their minimum, the
    /// rest to `*` (see [`cron_expression`]). Interval arguments combine
    /// `seconds`, `minutes`, and `hours`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTrigger`] for unknown types or
    /// unparseable arguments.
    pub fn from_spec(trigger_type: &str, args: &Value, tz: Tz) -> SchedulerResult<Self> {
        match trigger_type {
            "date" => {
                let raw = args
                    .get("run_date")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SchedulerError::InvalidTrigger("missing run_date".into()))?;
                let when = parse_run_date(raw).ok_or_else(|| {
                    SchedulerError::InvalidTrigger(format!("unparseable run_date '{raw}'"))
                })?;
                Ok(Self::Date(when))
            },
            "cron" => {
                let expression = cron_expression(args);
                let schedule = Schedule::from_str(&expression).map_err(|e| {
                    SchedulerError::InvalidTrigger(format!("cron '{expression}': {e}"))
                })?;
                Ok(Self::Cron(Box::new(schedule), tz))
            },
            "interval" => {
                let seconds = num_field(args, "seconds")
                    + num_field(args, "minutes") * 60.0
                    + num_field(args, "hours") * 3600.0;
                if seconds <= 0.0 {
                    return Err(SchedulerError::InvalidTrigger(
                        "interval must be positive".into(),
                    ));
                }
                #[allow(clippy::cast_possible_truncation)]
                Ok(Self::Interval(Duration::milliseconds(
                    (seconds * 1000.0) as i64,
                )))
            },
            other => Err(SchedulerError::InvalidTrigger(format!(
                "unknown trigger type '{other}'"
            ))),
        }
    }

    /// The next fire time strictly after `after`, or `None` when the
    /// trigger is exhausted.
    #[must_use]
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(when) => (*when > after).then_some(*when),
            Self::Cron(schedule, tz) => schedule
                .after(&after.with_timezone(tz))
                .next()
                .map(|next| next.with_timezone(&Utc)),
            Self::Interval(period) => after.checked_add_signed(*period),
        }
    }

    /// Whether the trigger fires at most once.
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Date(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_date_trigger_fires_once() {
        let trigger =
            Trigger::from_spec("date", &json!({"run_date": "2099-01-01T09:00:00Z"}), Tz::UTC)
                .unwrap();
        assert!(trigger.is_one_shot());

        let before = utc("2098-12-31T00:00:00Z");
        assert_eq!(trigger.next_fire(before), Some(utc("2099-01-01T09:00:00Z")));

        let past = utc("2099-01-02T00:00:00Z");
        assert_eq!(trigger.next_fire(past), None);
    }

    #[test]
    fn test_cron_trigger_daily_hour() {
        let trigger = Trigger::from_spec(
            "cron",
            &json!({"hour": 9, "minute": 0}),
            Tz::UTC,
        )
        .unwrap();
        let after = utc("2099-06-01T10:00:00Z");
        let next = trigger.next_fire(after).unwrap();
        assert_eq!(next, utc("2099-06-02T09:00:00Z"));
    }

    #[test]
    fn test_cron_lone_hour_fires_once_daily() {
        // {"hour": 9} alone pins minute and second to 0: one fire per day
        // at 09:00:00, not every minute of the 9 o'clock hour.
        let trigger = Trigger::from_spec("cron", &json!({"hour": 9}), Tz::UTC).unwrap();

        let next = trigger.next_fire(utc("2099-06-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2099-06-01T09:00:00Z"));

        // The fire after 09:00 is tomorrow's, not 09:01.
        let next = trigger.next_fire(utc("2099-06-01T09:00:00Z")).unwrap();
        assert_eq!(next, utc("2099-06-02T09:00:00Z"));
    }

    #[test]
    fn test_cron_lone_day_of_week_fires_at_midnight() {
        use chrono::{Datelike, Timelike, Weekday};

        let trigger =
            Trigger::from_spec("cron", &json!({"day_of_week": "Mon"}), Tz::UTC).unwrap();
        let next = trigger.next_fire(utc("2099-06-01T10:00:00Z")).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute(), next.second()), (0, 0, 0));
    }

    #[test]
    fn test_cron_expression_defaults() {
        // Fields below the least-significant set one go to their minimum,
        // the rest stay wildcards.
        assert_eq!(cron_expression(&json!({"hour": 9})), "0 0 9 * * *");
        assert_eq!(cron_expression(&json!({"minute": 30})), "0 30 * * * *");
        assert_eq!(cron_expression(&json!({"day": 1})), "0 0 0 1 * *");
        assert_eq!(
            cron_expression(&json!({"day_of_week": "mon"})),
            "0 0 0 * * mon"
        );
        assert_eq!(
            cron_expression(&json!({"hour": 9, "day_of_week": "fri"})),
            "0 0 9 * * fri"
        );
        // Nothing set: fire every minute, not every second.
        assert_eq!(cron_expression(&json!({})), "0 * * * * *");
    }

    #[test]
    fn test_cron_trigger_timezone_aware() {
        use chrono::Timelike;

        let lisbon: Tz = "Europe/Lisbon".parse().unwrap();
        let trigger = Trigger::from_spec("cron", &json!({"hour": 9, "minute": 0}), lisbon).unwrap();

        // Mid-June, Lisbon is UTC+1: 09:00 local is 08:00 UTC.
        let after = utc("2099-06-14T00:00:00Z");
        let next = trigger.next_fire(after).unwrap();
        let local = next.with_timezone(&lisbon);
        assert_eq!(local.hour(), 9);
        assert_eq!(next.hour(), 8);
    }

    #[test]
    fn test_interval_trigger() {
        let trigger =
            Trigger::from_spec("interval", &json!({"minutes": 5}), Tz::UTC).unwrap();
        let after = utc("2099-01-01T00:00:00Z");
        assert_eq!(trigger.next_fire(after), Some(utc("2099-01-01T00:05:00Z")));
        assert!(!trigger.is_one_shot());
    }

    #[test]
    fn test_interval_combines_units() {
        let trigger = Trigger::from_spec(
            "interval",
            &json!({"hours": 1, "minutes": 30, "seconds": 30}),
            Tz::UTC,
        )
        .unwrap();
        let after = utc("2099-01-01T00:00:00Z");
        assert_eq!(trigger.next_fire(after), Some(utc("2099-01-01T01:30:30Z")));
    }

    #[test]
    fn test_invalid_specs() {
        assert!(Trigger::from_spec("date", &json!({}), Tz::UTC).is_err());
        assert!(Trigger::from_spec("interval", &json!({}), Tz::UTC).is_err());
        assert!(Trigger::from_spec("cron", &json!({"minute": "not-a-minute"}), Tz::UTC).is_err());
        assert!(Trigger::from_spec("lunar", &json!({}), Tz::UTC).is_err());
    }
}
