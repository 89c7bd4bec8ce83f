use logger_core::config::{SAMPLE_INTERVAL_SECS, SchedulerConfig};
use logger_core::scheduler::AlarmScheduler;
use logger_core::time_source::{AlarmPort, Epoch};

#[derive(Default)]
struct RecordingAlarm {
    armed: Vec<Epoch>,
    latched: bool,
}

impl AlarmPort for RecordingAlarm {
    fn has_hardware_alarm(&self) -> bool {
        true
    }

    fn arm(&mut self, epoch: Epoch) -> bool {
        self.armed.push(epoch);
        true
    }

    fn fired(&mut self) -> bool {
        self.latched
    }

    fn clear(&mut self) {
        self.latched = false;
    }
}

const I: u32 = SAMPLE_INTERVAL_SECS;

#[test]
fn init_lands_strictly_after_start_on_the_grid() {
    let mut alarm = RecordingAlarm::default();
    let mut scheduler = AlarmScheduler::default();

    for start in (0..400).chain([u32::MAX / 2, u32::MAX - 61, 1_700_000_000]) {
        scheduler.init(&mut alarm, start);
        let next = scheduler.next_epoch();
        assert_eq!(next % I, 0, "start {start}");
        assert!(next > start, "start {start}");
        assert!(next - start <= I, "start {start}");
        assert_eq!(scheduler.base_epoch(), next);
    }
}

#[test]
fn advance_always_lands_in_the_future_on_the_grid() {
    let mut alarm = RecordingAlarm::default();
    let mut scheduler = AlarmScheduler::default();
    scheduler.init(&mut alarm, 1_000);

    let mut now = 1_000;
    for gap in [0, 1, 29, 30, 31, 59, 60, 61, 299, 3_600, 86_401] {
        now += gap;
        scheduler.advance_after_fire(&mut alarm, now);
        let next = scheduler.next_epoch();
        assert!(next > now, "now {now}");
        assert!(next - now <= I, "now {now}");
        assert_eq!(next % I, 0);
        assert_eq!(alarm.armed.last().copied(), Some(next));
    }
}

#[test]
fn documented_scenario_fire_and_skip() {
    let mut alarm = RecordingAlarm::default();
    let mut scheduler = AlarmScheduler::default();

    scheduler.init(&mut alarm, 100);
    assert_eq!(scheduler.next_epoch(), 120);
    assert_eq!(scheduler.base_epoch(), 120);

    assert!(!scheduler.should_fire(&mut alarm, 119));
    assert!(scheduler.should_fire(&mut alarm, 125));
    scheduler.advance_after_fire(&mut alarm, 125);
    assert_eq!(scheduler.next_epoch(), 150);

    scheduler.advance_after_fire(&mut alarm, 200);
    assert_eq!(scheduler.next_epoch(), 210);
}

#[test]
fn documented_scenario_failsafe() {
    let mut alarm = RecordingAlarm::default();
    let mut scheduler = AlarmScheduler::default();
    scheduler.init(&mut alarm, 0);

    assert!(scheduler.failsafe_check(&mut alarm, 121));
    assert_eq!(scheduler.last_serviced_epoch(), 121);
    assert!(!scheduler.failsafe_check(&mut alarm, 121));
    assert!(!scheduler.failsafe_check(&mut alarm, 122));
}

#[test]
fn sanity_pulls_far_targets_within_one_interval() {
    let mut alarm = RecordingAlarm::default();
    let mut scheduler = AlarmScheduler::default();

    for jump_back in [91, 120, 500, 86_400] {
        scheduler.init(&mut alarm, 100_000);
        let target = scheduler.next_epoch();
        let now = target - jump_back;

        let realigned = scheduler.sanity(&mut alarm, now);
        assert!(realigned.is_some(), "jump {jump_back}");
        let next = scheduler.next_epoch();
        assert!(next > now && next - now <= I, "jump {jump_back}");
        assert_eq!(scheduler.base_epoch(), next);
    }

    // Exactly at the bound: left alone.
    scheduler.init(&mut alarm, 100_000);
    let target = scheduler.next_epoch();
    assert_eq!(scheduler.sanity(&mut alarm, target - 90), None);
    assert_eq!(scheduler.next_epoch(), target);
}

#[test]
fn mark_sample_never_moves_the_target() {
    let mut alarm = RecordingAlarm::default();
    let mut scheduler = AlarmScheduler::default();
    scheduler.init(&mut alarm, 100);

    scheduler.mark_sample(110);
    scheduler.mark_sample(110);
    assert_eq!(scheduler.next_epoch(), 120);
    assert_eq!(scheduler.last_serviced_epoch(), 110);
    assert_eq!(alarm.armed, [120]);
}

#[test]
fn cadence_survives_epoch_rollover() {
    let mut alarm = RecordingAlarm::default();
    let config = SchedulerConfig::new(30, 90, 120).expect("valid config");
    let mut scheduler = AlarmScheduler::new(config);

    let start = u32::MAX - 40;
    scheduler.init(&mut alarm, start);
    let mut now = start;
    let mut fired = 0;
    for _ in 0..200 {
        now = now.wrapping_add(1);
        if scheduler.should_fire(&mut alarm, now) {
            scheduler.advance_after_fire(&mut alarm, now);
            scheduler.mark_sample(now);
            fired += 1;
        }
        assert_eq!(scheduler.sanity(&mut alarm, now), None);
        assert!(!scheduler.failsafe_check(&mut alarm, now));
    }
    // 200 seconds at a 30 s cadence.
    assert!((6..=7).contains(&fired));
}
