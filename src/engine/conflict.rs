use std::collections::BTreeMap;
use std::ops::Range;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Validation ───────────────────────────────────────────────────

pub(crate) fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    if range.end >= MINUTES_PER_DAY {
        return Err(EngineError::validation(format!(
            "time range {}..{} must lie within [0, {MINUTES_PER_DAY}) minutes",
            range.start, range.end
        )));
    }
    if range.start >= range.end {
        return Err(EngineError::validation(format!(
            "time range start {} must be before end {}",
            format_hhmm(range.start),
            format_hhmm(range.end)
        )));
    }
    Ok(())
}

pub(crate) fn validate_id(field: &'static str, id: &str) -> Result<(), EngineError> {
    if id.trim().is_empty() {
        return Err(EngineError::validation(format!("{field} must not be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("identifier too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(text: &str, max: usize) -> Result<(), EngineError> {
    if text.len() > max {
        return Err(EngineError::LimitExceeded("text too long"));
    }
    Ok(())
}

pub(crate) fn validate_commitment(c: &Commitment) -> Result<(), EngineError> {
    validate_id("resource_id", &c.resource_id)?;
    validate_range(&c.range())?;
    validate_text(&c.purpose, MAX_TEXT_LEN)?;
    validate_text(&c.owner_name, MAX_NAME_LEN)?;
    Ok(())
}

// ── Admission ────────────────────────────────────────────────────

/// Every commitment on `rs` that would clash with `slot`.
///
/// Dated candidates are compared with same-date entries and with the
/// recurring entries of the date's weekday. Recurring candidates are compared
/// with recurring entries on the same weekday only. `exclude` skips the
/// commitment being edited. Results come back ordered by start, then id.
pub fn admission_conflicts<'a>(
    rs: &'a ResourceState,
    slot: &Slot,
    exclude: Option<CommitmentId>,
) -> Vec<&'a Commitment> {
    let range = slot.range();
    let mut hits: Vec<&Commitment> = Vec::new();

    match slot {
        Slot::Dated { date, .. } => {
            if let Some(sched) = rs.dated.get(date) {
                hits.extend(sched.overlapping(&range));
            }
            if let Some(weekday) = Weekday::of_date(*date)
                && let Some(sched) = rs.recurring.get(&weekday)
            {
                hits.extend(sched.overlapping(&range));
            }
        }
        Slot::Recurring { weekday, .. } => {
            if let Some(sched) = rs.recurring.get(weekday) {
                hits.extend(sched.overlapping(&range));
            }
        }
    }

    if let Some(skip) = exclude {
        hits.retain(|c| c.id != skip);
    }
    hits.sort_by_key(|c| (c.range().start, c.id));
    hits
}

pub(crate) fn check_admission(
    rs: &ResourceState,
    slot: &Slot,
    exclude: Option<CommitmentId>,
) -> Result<(), EngineError> {
    let clashes = admission_conflicts(rs, slot, exclude);
    if clashes.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict(clashes.into_iter().cloned().collect()))
    }
}

// ── Grid report ──────────────────────────────────────────────────

/// Sweep over commitments sorted by start: a commitment joins the running
/// cluster while its start is before the cluster's max end. Only clusters
/// with two or more members are returned.
pub fn overlap_clusters<'a>(sorted: &[&'a Commitment]) -> Vec<(TimeRange, Vec<&'a Commitment>)> {
    let mut clusters = Vec::new();
    let mut current: Vec<&Commitment> = Vec::new();
    let mut window = TimeRange::new(0, 0);

    for &c in sorted {
        let r = c.range();
        if !current.is_empty() && r.start < window.end {
            window.end = window.end.max(r.end);
            current.push(c);
            continue;
        }
        if current.len() >= 2 {
            clusters.push((window, std::mem::take(&mut current)));
        }
        current.clear();
        current.push(c);
        window = r;
    }
    if current.len() >= 2 {
        clusters.push((window, current));
    }

    for (_, members) in &mut clusters {
        members.sort_by_key(|c| (c.range().start, c.id));
    }
    clusters
}

/// Maximal runs of a start-sorted schedule whose ranges chain together,
/// each with the window it covers. Lone entries form runs of one.
fn chains(entries: &[Commitment]) -> Vec<(TimeRange, Range<usize>)> {
    let mut runs: Vec<(TimeRange, Range<usize>)> = Vec::new();
    for (i, c) in entries.iter().enumerate() {
        let r = c.range();
        match runs.last_mut() {
            Some((window, run)) if r.start < window.end => {
                window.end = window.end.max(r.end);
                run.end = i + 1;
            }
            _ => runs.push((r, i..i + 1)),
        }
    }
    runs
}

/// One date's entries ordered by start: every dated entry, plus the recurring
/// runs of its weekday that overlap at least one of them. Runs touching no
/// dated entry could only form recurring-only clusters.
fn dated_day<'a>(
    dated: &'a [Commitment],
    weekly: &'a [Commitment],
    runs: &[(TimeRange, Range<usize>)],
) -> Vec<&'a Commitment> {
    let mut picked: Vec<usize> = Vec::new();
    for d in dated {
        let r = d.range();
        // Run windows are disjoint and ascending, so both bounds are monotone.
        let lo = runs.partition_point(|(w, _)| w.end <= r.start);
        let hi = runs.partition_point(|(w, _)| w.start < r.end);
        picked.extend(lo..hi);
    }
    picked.sort_unstable();
    picked.dedup();

    let mut recurring = picked
        .into_iter()
        .flat_map(|i| weekly[runs[i].1.clone()].iter())
        .peekable();
    let mut own = dated.iter().peekable();
    let mut day = Vec::with_capacity(dated.len());
    loop {
        let next = match (own.peek(), recurring.peek()) {
            (Some(d), Some(w)) if w.range().start < d.range().start => recurring.next(),
            (Some(_), _) => own.next(),
            (None, Some(_)) => recurring.next(),
            (None, None) => break,
        };
        day.extend(next);
    }
    day
}

/// All conflict groups on one resource in canonical order: weekday groups
/// (Mon..Sat) then dated groups (ascending), each by window start.
///
/// A dated day is swept together with the recurring entries of its weekday;
/// clusters made only of recurring entries are skipped there since the
/// weekday pass already reports them.
pub fn resource_conflicts(rs: &ResourceState) -> Vec<ConflictGroup> {
    let mut groups = Vec::new();
    let mut runs: BTreeMap<Weekday, Vec<(TimeRange, Range<usize>)>> = BTreeMap::new();

    for (weekday, sched) in &rs.recurring {
        runs.insert(*weekday, chains(&sched.entries));
        let sorted: Vec<&Commitment> = sched.entries.iter().collect();
        for (window, members) in overlap_clusters(&sorted) {
            groups.push(ConflictGroup {
                resource_id: rs.resource.id.clone(),
                day: DayKey::Weekday(*weekday),
                window,
                commitments: members.into_iter().cloned().collect(),
            });
        }
    }

    for (date, sched) in &rs.dated {
        let day = match Weekday::of_date(*date)
            .and_then(|weekday| Some((rs.recurring.get(&weekday)?, runs.get(&weekday)?)))
        {
            Some((weekly, weekly_runs)) => dated_day(&sched.entries, &weekly.entries, weekly_runs),
            None => sched.entries.iter().collect(),
        };
        for (window, members) in overlap_clusters(&day) {
            if members.iter().all(|c| c.slot.is_recurring()) {
                continue;
            }
            groups.push(ConflictGroup {
                resource_id: rs.resource.id.clone(),
                day: DayKey::Date(*date),
                window,
                commitments: members.into_iter().cloned().collect(),
            });
        }
    }

    groups
}
