use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, specializes_in};

/// Day offsets tried around a rejected booking, in order.
pub const DAY_OFFSETS: [i64; 6] = [-3, -2, -1, 1, 2, 3];
/// Hour offsets tried within each candidate day, in order.
pub const HOUR_OFFSETS: [i64; 5] = [0, 1, 2, -1, -2];

/// A technician considered by the availability search, with a read view of
/// their schedule (`None` when they have never been booked).
pub struct Candidate<'a> {
    pub technician: &'a Technician,
    pub schedule: Option<&'a Schedule>,
}

/// Can this technician be offered for the appliance at all?
pub fn qualifies(technician: &Technician, appliance_type: &str) -> bool {
    specializes_in(&technician.specialties, appliance_type)
        && matches!(
            technician.status,
            TechnicianStatus::Available | TechnicianStatus::Busy
        )
}

fn is_free(schedule: Option<&Schedule>, span: &Span) -> bool {
    schedule.is_none_or(|s| find_conflict(s, span, None).is_none())
}

/// Hourly slot search anchored at `range_start`.
///
/// Candidate instants are `range_start + k hours` while `< range_end`. The
/// result is stably sorted by (datetime asc, rating desc), so among equal
/// keys the candidate order wins. Only the first `MAX_SLOTS_RETURNED` are
/// kept; `total_slots` counts all of them.
pub fn search_slots(
    candidates: &[Candidate<'_>],
    range_start: Ms,
    range_end: Ms,
    duration_minutes: u32,
) -> SlotSearch {
    let mut slots = Vec::new();
    let mut instant = range_start;
    while instant < range_end {
        let span = Span::from_minutes(instant, duration_minutes);
        for candidate in candidates {
            if is_free(candidate.schedule, &span) {
                let technician = candidate.technician;
                slots.push(Slot {
                    datetime: instant,
                    technician_id: technician.id.clone(),
                    technician_name: technician.name.clone(),
                    duration_minutes,
                    specialties: technician.specialties.clone(),
                    rating: technician.rating(),
                });
            }
        }
        instant += HOUR_MS;
    }

    slots.sort_by(|a, b| {
        a.datetime
            .cmp(&b.datetime)
            .then_with(|| b.rating.total_cmp(&a.rating))
    });
    let total_slots = slots.len();
    slots.truncate(MAX_SLOTS_RETURNED);
    SlotSearch {
        slots,
        total_slots,
        qualified_technicians: candidates.len(),
    }
}

/// Nearby free instants for the same technician after a rejected booking.
///
/// Walks `DAY_OFFSETS × HOUR_OFFSETS` in order, skips anything not strictly
/// after `now`, and stops at `MAX_ALTERNATIVES`.
pub fn suggest_alternatives(
    schedule: Option<&Schedule>,
    technician_id: &str,
    preferred: Ms,
    duration_minutes: u32,
    now: Ms,
) -> Vec<Alternative> {
    let mut alternatives = Vec::new();
    for day in DAY_OFFSETS {
        for hour in HOUR_OFFSETS {
            let start = preferred + day * DAY_MS + hour * HOUR_MS;
            if start <= now {
                continue;
            }
            if is_free(schedule, &Span::from_minutes(start, duration_minutes)) {
                alternatives.push(Alternative {
                    datetime: start,
                    technician_id: technician_id.to_string(),
                    duration_minutes,
                });
                if alternatives.len() >= MAX_ALTERNATIVES {
                    return alternatives;
                }
            }
        }
    }
    alternatives
}

/// Gaps in a technician's day: the query window minus every active visit,
/// keeping only gaps at least `min_duration` long.
pub fn free_windows(schedule: Option<&Schedule>, query: &Span, min_duration: Option<Ms>) -> Vec<Span> {
    let busy: Vec<Span> = schedule
        .map(|s| {
            s.overlapping(query)
                .filter(|v| v.is_active())
                .map(|v| v.span)
                .collect()
        })
        .unwrap_or_default();

    let free = if busy.is_empty() {
        vec![*query]
    } else {
        subtract_intervals(&[*query], &merge_overlapping(&busy))
    };
    match min_duration {
        Some(min) => free.into_iter().filter(|s| s.duration_ms() >= min).collect(),
        None => free,
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
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
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEPT_5_8AM: Ms = 1_757_059_200_000;
    const SEPT_1: Ms = 1_756_684_800_000;

    fn technician(id: &str, name: &str, status: TechnicianStatus, rating: f64) -> Technician {
        let mut profile = Attributes::default();
        profile.insert("rating", rating);
        Technician {
            id: id.into(),
            name: name.into(),
            specialties: vec!["refrigerator".into(), "dishwasher".into()],
            current_location: (41.8781, -87.6298),
            status,
            phone: "555-0101".into(),
            estimated_arrival: None,
            current_appointment_id: None,
            profile,
        }
    }

    fn booked(technician_id: &str, start: Ms, minutes: u32) -> Schedule {
        let mut schedule = Schedule::new(technician_id);
        schedule.insert_visit(Visit {
            appointment_id: "APPT001".into(),
            span: Span::from_minutes(start, minutes),
            status: AppointmentStatus::Scheduled,
        });
        schedule
    }

    // ── qualification ────────────────────────────────────

    #[test]
    fn qualification_needs_specialty_and_working_status() {
        let busy = technician("TECH001", "Mike", TechnicianStatus::Busy, 4.8);
        let off = technician("TECH002", "Sarah", TechnicianStatus::OffDuty, 4.9);
        let en_route = technician("TECH003", "Dave", TechnicianStatus::EnRoute, 4.5);
        assert!(qualifies(&busy, "Refrigerator"));
        assert!(!qualifies(&busy, "oven"));
        assert!(!qualifies(&off, "refrigerator"));
        assert!(!qualifies(&en_route, "refrigerator"));
    }

    // ── search_slots ─────────────────────────────────────

    #[test]
    fn slots_step_hourly_from_range_start() {
        let tech = technician("TECH001", "Mike", TechnicianStatus::Available, 4.8);
        let candidates = [Candidate { technician: &tech, schedule: None }];
        let start = SEPT_5_8AM + 30 * MINUTE_MS;
        let result = search_slots(&candidates, start, start + 3 * HOUR_MS, 90);
        let times: Vec<Ms> = result.slots.iter().map(|s| s.datetime).collect();
        assert_eq!(times, vec![start, start + HOUR_MS, start + 2 * HOUR_MS]);
        assert_eq!(result.total_slots, 3);
        assert_eq!(result.qualified_technicians, 1);
        assert_eq!(result.slots[0].rating, 4.8);
    }

    #[test]
    fn booked_hours_are_skipped() {
        let tech = technician("TECH001", "Mike", TechnicianStatus::Available, 4.8);
        let schedule = booked("TECH001", SEPT_5_8AM, 120);
        let candidates = [Candidate { technician: &tech, schedule: Some(&schedule) }];
        let result = search_slots(&candidates, SEPT_5_8AM - HOUR_MS, SEPT_5_8AM + 4 * HOUR_MS, 60);
        let times: Vec<Ms> = result.slots.iter().map(|s| s.datetime).collect();
        // 7:00-8:00 touches the booking and is free; 8:00 and 9:00 overlap it.
        assert_eq!(
            times,
            vec![SEPT_5_8AM - HOUR_MS, SEPT_5_8AM + 2 * HOUR_MS, SEPT_5_8AM + 3 * HOUR_MS]
        );
    }

    #[test]
    fn ties_break_on_rating_then_candidate_order() {
        let low = technician("TECH001", "Mike", TechnicianStatus::Available, 4.2);
        let high = technician("TECH002", "Sarah", TechnicianStatus::Busy, 4.9);
        let same = technician("TECH003", "Dave", TechnicianStatus::Available, 4.2);
        let candidates = [
            Candidate { technician: &low, schedule: None },
            Candidate { technician: &high, schedule: None },
            Candidate { technician: &same, schedule: None },
        ];
        let result = search_slots(&candidates, SEPT_5_8AM, SEPT_5_8AM + HOUR_MS, 60);
        let ids: Vec<&str> = result.slots.iter().map(|s| s.technician_id.as_str()).collect();
        assert_eq!(ids, ["TECH002", "TECH001", "TECH003"]);
    }

    #[test]
    fn results_truncate_at_twenty() {
        let tech = technician("TECH001", "Mike", TechnicianStatus::Available, 4.8);
        let candidates = [Candidate { technician: &tech, schedule: None }];
        let result = search_slots(&candidates, SEPT_5_8AM, SEPT_5_8AM + 48 * HOUR_MS, 60);
        assert_eq!(result.slots.len(), MAX_SLOTS_RETURNED);
        assert_eq!(result.total_slots, 48);
    }

    #[test]
    fn empty_range_yields_nothing() {
        let tech = technician("TECH001", "Mike", TechnicianStatus::Available, 4.8);
        let candidates = [Candidate { technician: &tech, schedule: None }];
        let result = search_slots(&candidates, SEPT_5_8AM, SEPT_5_8AM, 60);
        assert!(result.slots.is_empty());
        assert_eq!(result.total_slots, 0);
    }

    // ── suggest_alternatives ─────────────────────────────

    #[test]
    fn alternatives_follow_offset_order() {
        let schedule = booked("TECH001", SEPT_5_8AM, 120);
        let alts = suggest_alternatives(Some(&schedule), "TECH001", SEPT_5_8AM, 120, SEPT_1);
        let expected: Vec<Ms> = vec![
            SEPT_5_8AM - 3 * DAY_MS,
            SEPT_5_8AM - 3 * DAY_MS + HOUR_MS,
            SEPT_5_8AM - 3 * DAY_MS + 2 * HOUR_MS,
            SEPT_5_8AM - 3 * DAY_MS - HOUR_MS,
            SEPT_5_8AM - 3 * DAY_MS - 2 * HOUR_MS,
        ];
        assert_eq!(alts.iter().map(|a| a.datetime).collect::<Vec<_>>(), expected);
        assert!(alts.iter().all(|a| a.technician_id == "TECH001" && a.duration_minutes == 120));
    }

    #[test]
    fn alternatives_skip_past_instants() {
        // Preferred 09-02 08:00 with now at 09-01 09:00: the -3 and -2 day
        // candidates are all past, and on -1 day only 10:00 is after now.
        let preferred = SEPT_5_8AM - 3 * DAY_MS;
        let now = SEPT_1 + 9 * HOUR_MS;
        let alts = suggest_alternatives(None, "TECH002", preferred, 60, now);
        assert_eq!(alts.len(), MAX_ALTERNATIVES);
        assert!(alts.iter().all(|a| a.datetime > now));
        assert_eq!(alts[0].datetime, preferred - DAY_MS + HOUR_MS * 2);
    }

    #[test]
    fn alternatives_empty_when_all_in_past() {
        let alts = suggest_alternatives(None, "TECH001", SEPT_1, 60, SEPT_1 + 10 * DAY_MS);
        assert!(alts.is_empty());
    }

    // ── free_windows ─────────────────────────────────────

    #[test]
    fn free_windows_subtract_active_visits() {
        let mut schedule = booked("TECH001", SEPT_5_8AM, 120);
        schedule.insert_visit(Visit {
            appointment_id: "APPT002".into(),
            span: Span::from_minutes(SEPT_5_8AM + 5 * HOUR_MS, 60),
            status: AppointmentStatus::Cancelled,
        });
        let day = Span::new(SEPT_5_8AM - 2 * HOUR_MS, SEPT_5_8AM + 8 * HOUR_MS);
        let free = free_windows(Some(&schedule), &day, None);
        assert_eq!(
            free,
            vec![
                Span::new(SEPT_5_8AM - 2 * HOUR_MS, SEPT_5_8AM),
                Span::new(SEPT_5_8AM + 2 * HOUR_MS, SEPT_5_8AM + 8 * HOUR_MS),
            ]
        );
        let long = free_windows(Some(&schedule), &day, Some(3 * HOUR_MS));
        assert_eq!(long, vec![Span::new(SEPT_5_8AM + 2 * HOUR_MS, SEPT_5_8AM + 8 * HOUR_MS)]);
        assert_eq!(free_windows(None, &day, None), vec![day]);
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }
}
