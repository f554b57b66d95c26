use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use tokio::sync::watch;

use super::{ChatTransport, Inner, TIMEZONE};
use crate::upstream::MealKind;

/// The three daily triggers, at local wall-clock hours. Breakfast before
/// lunch before dinner is enforced by the clock alone.
pub(super) const TICKS: [(MealKind, u32); 3] = [
    (MealKind::Breakfast, 7),
    (MealKind::Lunch, 11),
    (MealKind::Dinner, 17),
];

/// Next wall-clock occurrence of `hour:00` strictly after `now`. A tick
/// swallowed by a DST gap rolls over to the next day it exists on.
pub(super) fn next_occurrence(now: DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let tick = NaiveTime::MIN
        .with_hour(hour)
        .expect("tick hour out of range");

    let mut date = now.date_naive();
    if now.time() >= tick {
        date = date.succ_opt().expect("date out of range");
    }

    loop {
        match date.and_time(tick).and_local_timezone(TIMEZONE).earliest() {
            Some(next) => return next,
            None => date = date.succ_opt().expect("date out of range"),
        }
    }
}

/// One trigger task. Sleeps until the next occurrence of its hour, fans the
/// meal notification out, and repeats. Ticks that pass while the process is
/// down are simply gone; there is no catch-up. The shutdown signal stops the
/// loop between ticks, so an in-flight broadcast always runs to completion.
pub(super) async fn run_trigger<T: ChatTransport>(
    inner: Arc<Inner<T>>,
    kind: MealKind,
    hour: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("Scheduling {kind:?} notifications for {hour:02}:00 {TIMEZONE}");

    loop {
        let now = inner.clock.now();
        let next = next_occurrence(now, hour);
        let wait = (next - now).to_std().unwrap_or_default();
        log::debug!("{kind:?}: next tick at {next}");

        tokio::select! {
            _ = tokio::time::sleep(wait) => inner.broadcast(kind).await,
            _ = shutdown.changed() => break,
        }
    }

    log::info!("{kind:?} trigger shut down");
}
