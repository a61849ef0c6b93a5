use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Free sub-ranges of `window` on a room calendar: the window minus every
/// restriction overlapping it, clamped to the window.
pub fn free_stays(calendar: &RoomCalendar, window: &Stay) -> Vec<Stay> {
    let mut taken: Vec<Stay> = calendar
        .overlapping(window)
        .filter_map(|r| r.stay.clamp_to(window))
        .collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_stays(&[*window], &taken)
}

/// First restriction overlapping `stay`, if the room is not free.
pub fn first_conflict<'a>(calendar: &'a RoomCalendar, stay: &Stay) -> Option<&'a RoomRestriction> {
    calendar.overlapping(stay).next()
}

/// Merge sorted overlapping/adjacent stays into disjoint stays.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.start <= last.end
        {
            last.end = last.end.max(stay.end);
            continue;
        }
        merged.push(stay);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start and disjoint.
pub fn subtract_stays(base: &[Stay], to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Stay::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Stay::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn s(a: u32, b: u32) -> Stay {
        Stay::new(d(a), d(b))
    }

    fn calendar(stays: &[Stay]) -> RoomCalendar {
        let mut cal = RoomCalendar::new(Room {
            id: 1,
            name: "General's Quarters".into(),
        });
        for &stay in stays {
            cal.insert_restriction(RoomRestriction {
                id: Ulid::new(),
                room_id: 1,
                reservation_id: None,
                kind: RestrictionKind::Block,
                stay,
                created_at: Utc::now(),
            });
        }
        cal
    }

    #[test]
    fn empty_calendar_is_all_free() {
        let cal = calendar(&[]);
        assert_eq!(free_stays(&cal, &s(1, 30)), vec![s(1, 30)]);
        assert!(first_conflict(&cal, &s(1, 30)).is_none());
    }

    #[test]
    fn restrictions_carve_holes() {
        let cal = calendar(&[s(3, 5), s(10, 12)]);
        assert_eq!(
            free_stays(&cal, &s(1, 15)),
            vec![s(1, 3), s(5, 10), s(12, 15)]
        );
    }

    #[test]
    fn restriction_straddling_window_edges() {
        let cal = calendar(&[s(1, 4), s(12, 20)]);
        assert_eq!(free_stays(&cal, &s(2, 15)), vec![s(4, 12)]);
    }

    #[test]
    fn back_to_back_restrictions_leave_no_gap() {
        let cal = calendar(&[s(3, 5), s(5, 8)]);
        assert_eq!(free_stays(&cal, &s(1, 10)), vec![s(1, 3), s(8, 10)]);
    }

    #[test]
    fn fully_taken_window() {
        let cal = calendar(&[s(1, 30)]);
        assert!(free_stays(&cal, &s(5, 9)).is_empty());
        assert_eq!(first_conflict(&cal, &s(5, 9)).map(|r| r.stay), Some(s(1, 30)));
    }

    #[test]
    fn merge_joins_adjacent() {
        assert_eq!(
            merge_overlapping(&[s(1, 3), s(3, 5), s(4, 7), s(9, 10)]),
            vec![s(1, 7), s(9, 10)]
        );
    }

    #[test]
    fn subtract_multiple_bases() {
        assert_eq!(
            subtract_stays(&[s(1, 5), s(8, 12)], &[s(2, 3), s(4, 9)]),
            vec![s(1, 2), s(3, 4), s(9, 12)]
        );
    }
}
