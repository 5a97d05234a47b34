use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Days,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use tracing::{
  debug,
  info,
  warn
};

use crate::config::Config;

const TIMEZONE_ENV_VAR: &str =
  "TASKLANE_TIMEZONE";

/// Serde adapter for instants stored
/// as ISO strings with millisecond
/// precision (`2024-01-02T03:04:05.000Z`).
pub mod iso_instant_serde {
  use chrono::{
    DateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    value: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &value.to_rfc3339_opts(
        SecondsFormat::Millis,
        true
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw =
      String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(serde::de::Error::custom)
  }
}

/// Resolves the zone used to decide
/// what "today" is: config key, then
/// environment, then UTC.
#[tracing::instrument(skip(cfg))]
pub fn resolve_timezone(
  cfg: &Config
) -> Tz {
  if let Some(raw) = cfg.get("timezone")
    && let Some(tz) =
      parse_timezone(&raw, "config")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  debug!("no timezone configured; using UTC");
  chrono_tz::UTC
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      info!(
        source,
        timezone = %trimmed,
        "resolved timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      warn!(
        source,
        timezone = %trimmed,
        error = %err,
        "invalid timezone; ignoring"
      );
      None
    }
  }
}

#[must_use]
pub fn today_in(
  tz: &Tz,
  now: DateTime<Utc>
) -> NaiveDate {
  now.with_timezone(tz).date_naive()
}

/// Parses a due-date expression
/// relative to `today`. `Ok(None)`
/// means "no due date".
#[tracing::instrument]
pub fn parse_due_date(
  expr: &str,
  today: NaiveDate
) -> anyhow::Result<Option<NaiveDate>> {
  let token =
    expr.trim().to_ascii_lowercase();

  match token.as_str() {
    | "" | "none" => return Ok(None),
    | "today" => return Ok(Some(today)),
    | "tomorrow" => {
      return today
        .checked_add_days(Days::new(1))
        .map(Some)
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | "yesterday" => {
      return today
        .checked_sub_days(Days::new(1))
        .map(Some)
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | _ => {}
  }

  if let Some(weekday) =
    parse_weekday(&token)
  {
    return Ok(Some(next_weekday(
      today, weekday
    )));
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&token)
  {
    let num: u64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let days = match &caps["unit"] {
      | "w" => num.saturating_mul(7),
      | _ => num
    };

    let shifted = if &caps["sign"] == "-"
    {
      today
        .checked_sub_days(Days::new(days))
    } else {
      today
        .checked_add_days(Days::new(days))
    };

    return shifted.map(Some).ok_or_else(
      || {
        anyhow!(
          "relative date out of \
           range: {expr}"
        )
      }
    );
  }

  NaiveDate::parse_from_str(
    &token, "%Y-%m-%d"
  )
  .map(Some)
  .with_context(|| {
    format!(
      "unrecognized due date: {expr} \
       (expected YYYY-MM-DD, today, \
       tomorrow, a weekday or +Nd)"
    )
  })
}

fn parse_weekday(
  token: &str
) -> Option<Weekday> {
  let weekday = match token {
    | "mon" | "monday" => Weekday::Mon,
    | "tue" | "tuesday" => Weekday::Tue,
    | "wed" | "wednesday" => {
      Weekday::Wed
    }
    | "thu" | "thursday" => Weekday::Thu,
    | "fri" | "friday" => Weekday::Fri,
    | "sat" | "saturday" => Weekday::Sat,
    | "sun" | "sunday" => Weekday::Sun,
    | _ => return None
  };
  Some(weekday)
}

fn next_weekday(
  today: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let current = today
    .weekday()
    .num_days_from_monday();
  let wanted =
    target.num_days_from_monday();
  let mut delta =
    (7 + wanted - current) % 7;
  if delta == 0 {
    delta = 7;
  }
  today + Days::new(u64::from(delta))
}
