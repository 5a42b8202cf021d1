use crate::error::Error;
use chrono::{Duration, NaiveDate};

/// Campaign ids with their advertised object ids, in campaign listing order.
pub type ObjectMap = Vec<(String, Vec<String>)>;

/// Splits the campaign/object map into chunks of at most `campaign_limit`
/// campaigns, preserving the original order. A map that already fits the
/// limit comes back as a single chunk.
pub fn split_objects(objects: &[(String, Vec<String>)], campaign_limit: usize) -> Vec<ObjectMap> {
    objects
        .chunks(campaign_limit.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Splits the inclusive `[date_from, date_to]` range into consecutive
/// sub-ranges of `day_limit` calendar days, the last one clipped at
/// `date_to`. A range that fits the limit comes back unchanged.
pub fn split_time(
    date_from: NaiveDate,
    date_to: NaiveDate,
    day_limit: i64,
) -> Result<Vec<(NaiveDate, NaiveDate)>, Error> {
    if date_from > date_to {
        return Err(Error::StartDateAfterEndDate {
            start_date: date_from.to_string(),
            end_date: date_to.to_string(),
        });
    }

    let day_limit = day_limit.max(1);
    let span = (date_to - date_from).num_days();
    if span <= day_limit {
        return Ok(vec![(date_from, date_to)]);
    }

    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset <= span {
        let sub_from = date_from + Duration::days(offset);
        let sub_to = (date_from + Duration::days(offset + day_limit - 1)).min(date_to);
        ranges.push((sub_from, sub_to));
        offset += day_limit;
    }

    Ok(ranges)
}
