use crate::types::{CustomerProfile, EventRecord};

/// Flattens a profile into one timeline ordered by `date` ascending.
///
/// Dates are ISO strings and compare lexically. The sort is stable: records sharing a date keep
/// category order, then source order. Each record is tagged with the category it came from.
pub fn build_journey(profile: &CustomerProfile) -> Vec<EventRecord> {
    let mut journey: Vec<EventRecord> = profile
        .records
        .iter()
        .flat_map(|(category, records)| {
            records.iter().cloned().map(move |mut record| {
                record.category.get_or_insert_with(|| category.clone());
                record
            })
        })
        .collect();
    journey.sort_by(|left, right| left.date.cmp(&right.date));
    journey
}
