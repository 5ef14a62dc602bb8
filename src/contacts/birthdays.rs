use time::{Date, Month};

use super::repo::Contact;

/// The birthday as it falls in `year`; 29 February maps to the 28th in common years.
fn anniversary(birthday: Date, year: i32) -> Option<Date> {
    Date::from_calendar_date(year, birthday.month(), birthday.day())
        .or_else(|_| Date::from_calendar_date(year, Month::February, 28))
        .ok()
}

/// First anniversary of `birthday` on or after `today`.
pub fn next_birthday(birthday: Date, today: Date) -> Option<Date> {
    match anniversary(birthday, today.year()) {
        Some(d) if d >= today => Some(d),
        _ => anniversary(birthday, today.year() + 1),
    }
}

/// Contacts whose next birthday is within `[today, today + days]`, soonest first.
pub fn upcoming(contacts: Vec<Contact>, today: Date, days: i64) -> Vec<Contact> {
    let mut hits: Vec<(i64, Contact)> = contacts
        .into_iter()
        .filter_map(|c| {
            let next = next_birthday(c.birthday, today)?;
            let until = (next - today).whole_days();
            (until <= days).then_some((until, c))
        })
        .collect();
    hits.sort_by(|(a, ca), (b, cb)| {
        a.cmp(b)
            .then_with(|| ca.last_name.cmp(&cb.last_name))
            .then_with(|| ca.first_name.cmp(&cb.first_name))
    });
    hits.into_iter().map(|(_, c)| c).collect()
}
