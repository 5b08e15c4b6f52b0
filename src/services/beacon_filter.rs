//! Beacon signal filtering and hysteresis
//!
//! Raw ranging frames are noisy: beacons flicker between proximity classes,
//! distance estimates jump, and whole cycles come back empty. The filter
//! merges the latest list per region, picks the closest beacon, and only
//! moves the selected step after a streak of consistent samples.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::domain::car_status::CarStatus;
use crate::domain::types::{
    BeaconList, CarIdentification, CarStepId, DistanceObservation, Proximity, RangingUpdate,
    RegionKey, SelectedStep,
};
use crate::infra::config::Config;

/// The closest mappable beacon of one ranging cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangedCar {
    pub step: CarStepId,
    pub proximity: Proximity,
    /// Raw scanner accuracy; `<= 0.0` means no distance estimate.
    pub meters: f64,
}

/// What one ranging cycle amounted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// A recognized step beacon was the closest this cycle.
    Ranged(RangedCar),
    /// The empty-cycle limit was crossed this cycle; localization is lost.
    Lost,
    /// Nothing mappable this cycle, loss threshold not (newly) crossed.
    Empty,
}

/// Effect of folding one ranged sample into the car status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangedEffect {
    /// A short-range pin is active; the sample was ignored.
    Pinned,
    /// The selected step changed to a new concrete step.
    StepChanged(CarStepId),
    /// Sustained far readings cleared the selected step.
    StepCleared,
    /// Distance bookkeeping only; selection unchanged.
    Updated,
}

/// Smooths ranging input into stable step selection decisions.
///
/// Owns the per-region beacon cache and the empty-cycle counter; the
/// distance observation it maintains lives inside `CarStatus` but is
/// mutated only here.
pub struct BeaconSignalFilter {
    car: CarIdentification,
    promotion_max_meters: f64,
    promotion_stable_cycles: u32,
    demotion_stable_cycles: u32,
    empty_cycle_limit: u32,
    /// Latest beacon list per region, in first-seen order. Kept as a vec so
    /// the closest-beacon tie break ("first encountered wins") is stable;
    /// a car has at most a handful of regions.
    regions: Vec<(RegionKey, BeaconList)>,
    empty_cycles: u32,
}

impl BeaconSignalFilter {
    pub fn new(config: &Config) -> Self {
        Self {
            car: config.car_identification(),
            promotion_max_meters: config.promotion_max_meters(),
            promotion_stable_cycles: config.promotion_stable_cycles(),
            demotion_stable_cycles: config.demotion_stable_cycles(),
            empty_cycle_limit: config.empty_cycle_limit(),
            regions: Vec::new(),
            empty_cycles: 0,
        }
    }

    /// Fold one per-region update into the cycle state.
    ///
    /// Returns `Lost` exactly once per loss: on the cycle that crosses the
    /// empty-cycle limit. Later empty cycles return `Empty` until a
    /// mappable beacon resets the counter.
    pub fn ingest(&mut self, update: RangingUpdate) -> CycleOutcome {
        match self.regions.iter_mut().find(|(key, _)| *key == update.region) {
            Some((_, beacons)) => *beacons = update.beacons,
            None => self.regions.push((update.region, update.beacons)),
        }

        let closest = self
            .regions
            .iter()
            .flat_map(|(_, beacons)| beacons.iter())
            .min_by(|a, b| a.accuracy_m.total_cmp(&b.accuracy_m));

        let ranged = closest.and_then(|beacon| {
            self.car.step_for(beacon.uuid, beacon.major).map(|step| RangedCar {
                step,
                proximity: beacon.proximity,
                meters: beacon.accuracy_m,
            })
        });

        match ranged {
            Some(car) => {
                self.empty_cycles = 0;
                CycleOutcome::Ranged(car)
            }
            None => {
                self.empty_cycles = self.empty_cycles.saturating_add(1);
                if self.empty_cycles == self.empty_cycle_limit + 1 {
                    debug!(empty_cycles = %self.empty_cycles, "localization_lost");
                    CycleOutcome::Lost
                } else {
                    CycleOutcome::Empty
                }
            }
        }
    }

    /// Apply hysteresis for one ranged sample, mutating the distance
    /// observation and possibly the selected step.
    ///
    /// The stable counter is reset-then-count-current: a sample that flips
    /// the proximity bucket starts a new streak at 1, so the counter always
    /// reads "consecutive samples in the current bucket".
    pub fn apply(&self, status: &mut CarStatus, ranged: &RangedCar) -> RangedEffect {
        if status.selected_step.force_located {
            return RangedEffect::Pinned;
        }

        let same_bucket = ranged.proximity.is_close() == status.distance.proximity.is_close();
        let stable_count = if same_bucket { status.distance.stable_count + 1 } else { 1 };

        status.distance = DistanceObservation {
            proximity: ranged.proximity,
            meters: (ranged.meters > 0.0).then_some(ranged.meters),
            stable_count,
        };

        if ranged.proximity.is_close()
            && status.distance.meters.is_some_and(|m| m < self.promotion_max_meters)
            && stable_count > self.promotion_stable_cycles
        {
            // Promotion. Re-selecting the same step is a no-op so the view
            // is not churned by every confirming sample.
            if status.selected_step.step != ranged.step {
                status.selected_step = SelectedStep { step: ranged.step, force_located: false };
                return RangedEffect::StepChanged(ranged.step);
            }
            return RangedEffect::Updated;
        }

        if ranged.proximity == Proximity::Far
            && stable_count > self.demotion_stable_cycles
            && status.selected_step.step != CarStepId::Unknown
        {
            status.selected_step = SelectedStep::default();
            return RangedEffect::StepCleared;
        }

        RangedEffect::Updated
    }

    /// Drop all cached region lists and the empty-cycle counter. Called when
    /// monitoring stops so a later restart begins from a clean slate.
    pub fn reset(&mut self) {
        self.regions.clear();
        self.empty_cycles = 0;
    }

    #[cfg(test)]
    pub(crate) fn empty_cycles(&self) -> u32 {
        self.empty_cycles
    }
}

/// Registered-region bookkeeping shared by tests and the ranging client.
/// Registration is keyed by region identity so duplicate start requests
/// cannot double-register a region.
#[derive(Debug, Default)]
pub struct RegionRegistry {
    regions: FxHashSet<RegionKey>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register regions, ignoring ones already present. Returns how many
    /// were newly added.
    pub fn register(&mut self, regions: &[RegionKey]) -> usize {
        regions.iter().filter(|region| self.regions.insert(**region)).count()
    }

    /// Unregister everything. Idempotent: a second clear is a no-op.
    pub fn clear(&mut self) {
        self.regions.clear();
    }

    pub fn contains(&self, region: &RegionKey) -> bool {
        self.regions.contains(region)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BeaconObservation;
    use smallvec::smallvec;
    use uuid::Uuid;

    fn config_with_uuid(uuid: Uuid) -> Config {
        Config::default().with_beacon_uuid(uuid)
    }

    fn beacon(uuid: Uuid, major: u16, proximity: Proximity, accuracy_m: f64) -> BeaconObservation {
        BeaconObservation { uuid, major, proximity, accuracy_m }
    }

    fn update(uuid: Uuid, major: u16, beacons: BeaconList) -> RangingUpdate {
        RangingUpdate { region: RegionKey { uuid, major }, beacons }
    }

    fn status(config: &Config) -> CarStatus {
        CarStatus::new(config.car_identification())
    }

    #[test]
    fn test_closest_beacon_wins() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let mut filter = BeaconSignalFilter::new(&config);

        // front_left at 2.0m, rear_left at 0.6m: rear_left is closest
        let outcome = filter.ingest(update(
            uuid,
            1,
            smallvec![
                beacon(uuid, 1, Proximity::Near, 2.0),
                beacon(uuid, 3, Proximity::Immediate, 0.6),
            ],
        ));

        match outcome {
            CycleOutcome::Ranged(car) => {
                assert_eq!(car.step, CarStepId::RearLeft);
                assert_eq!(car.meters, 0.6);
            }
            other => panic!("expected ranged, got {other:?}"),
        }
    }

    #[test]
    fn test_tie_breaks_to_first_encountered() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let mut filter = BeaconSignalFilter::new(&config);

        let outcome = filter.ingest(update(
            uuid,
            1,
            smallvec![
                beacon(uuid, 1, Proximity::Near, 0.8),
                beacon(uuid, 3, Proximity::Near, 0.8),
            ],
        ));

        match outcome {
            CycleOutcome::Ranged(car) => assert_eq!(car.step, CarStepId::FrontLeft),
            other => panic!("expected ranged, got {other:?}"),
        }
    }

    #[test]
    fn test_merges_latest_list_across_regions() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let mut filter = BeaconSignalFilter::new(&config);

        // Region 1 ranged far away in an earlier cycle
        filter.ingest(update(uuid, 1, smallvec![beacon(uuid, 1, Proximity::Far, 4.0)]));
        // Region 3 ranges closer now; merged pick must span both regions
        let outcome =
            filter.ingest(update(uuid, 3, smallvec![beacon(uuid, 3, Proximity::Near, 0.9)]));

        match outcome {
            CycleOutcome::Ranged(car) => assert_eq!(car.step, CarStepId::RearLeft),
            other => panic!("expected ranged, got {other:?}"),
        }

        // Region 3 empties again: region 1's cached list takes over
        let outcome = filter.ingest(update(uuid, 3, smallvec![]));
        match outcome {
            CycleOutcome::Ranged(car) => assert_eq!(car.step, CarStepId::FrontLeft),
            other => panic!("expected ranged, got {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_beacon_counts_as_empty() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let mut filter = BeaconSignalFilter::new(&config);

        // major 2 (front_right) is not an installed step in the default config
        let outcome =
            filter.ingest(update(uuid, 2, smallvec![beacon(uuid, 2, Proximity::Near, 0.5)]));
        assert_eq!(outcome, CycleOutcome::Empty);
        assert_eq!(filter.empty_cycles(), 1);
    }

    #[test]
    fn test_lost_fires_exactly_once_on_eleventh_empty() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let mut filter = BeaconSignalFilter::new(&config);

        for i in 1..=10 {
            let outcome = filter.ingest(update(uuid, 1, smallvec![]));
            assert_eq!(outcome, CycleOutcome::Empty, "cycle {i} should stay quiet");
        }
        assert_eq!(filter.ingest(update(uuid, 1, smallvec![])), CycleOutcome::Lost);
        // Cycle 12 and onward stay quiet until a beacon resets the streak
        assert_eq!(filter.ingest(update(uuid, 1, smallvec![])), CycleOutcome::Empty);
    }

    #[test]
    fn test_ranged_resets_empty_streak() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let mut filter = BeaconSignalFilter::new(&config);

        for _ in 0..9 {
            filter.ingest(update(uuid, 1, smallvec![]));
        }
        filter.ingest(update(uuid, 1, smallvec![beacon(uuid, 1, Proximity::Near, 0.5)]));
        assert_eq!(filter.empty_cycles(), 0);
    }

    #[test]
    fn test_promotion_on_fourth_stable_sample() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let filter = BeaconSignalFilter::new(&config);
        let mut status = status(&config);

        let sample = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Immediate, meters: 0.5 };

        // Samples 1-3: bucket flips then stabilizes, no promotion yet
        for expected_count in 1..=3u32 {
            let effect = filter.apply(&mut status, &sample);
            assert_eq!(effect, RangedEffect::Updated);
            assert_eq!(status.distance.stable_count, expected_count);
            assert_eq!(status.selected_step.step, CarStepId::Unknown);
        }

        // Sample 4: count reaches 4 > 3, step promoted
        let effect = filter.apply(&mut status, &sample);
        assert_eq!(effect, RangedEffect::StepChanged(CarStepId::RearLeft));
        assert_eq!(status.selected_step.step, CarStepId::RearLeft);
        assert!(!status.selected_step.force_located);

        // Sample 5: same step, selection no-op
        let effect = filter.apply(&mut status, &sample);
        assert_eq!(effect, RangedEffect::Updated);
        assert_eq!(status.selected_step.step, CarStepId::RearLeft);
    }

    #[test]
    fn test_no_promotion_beyond_distance_gate() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let filter = BeaconSignalFilter::new(&config);
        let mut status = status(&config);

        let sample = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Near, meters: 1.4 };
        for _ in 0..8 {
            filter.apply(&mut status, &sample);
        }
        assert_eq!(status.selected_step.step, CarStepId::Unknown);
    }

    #[test]
    fn test_unknown_distance_never_promotes() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let filter = BeaconSignalFilter::new(&config);
        let mut status = status(&config);

        // Scanner reports no distance estimate
        let sample = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Immediate, meters: -1.0 };
        for _ in 0..8 {
            filter.apply(&mut status, &sample);
        }
        assert_eq!(status.selected_step.step, CarStepId::Unknown);
        assert_eq!(status.distance.meters, None);
    }

    #[test]
    fn test_bucket_flip_resets_streak() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let filter = BeaconSignalFilter::new(&config);
        let mut status = status(&config);

        let close = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Immediate, meters: 0.5 };
        let far = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Far, meters: 5.0 };

        filter.apply(&mut status, &close);
        filter.apply(&mut status, &close);
        assert_eq!(status.distance.stable_count, 2);

        filter.apply(&mut status, &far);
        assert_eq!(status.distance.stable_count, 1);

        // Back to close: streak starts over, promotion still 4 samples away
        filter.apply(&mut status, &close);
        assert_eq!(status.distance.stable_count, 1);
        assert_eq!(status.selected_step.step, CarStepId::Unknown);
    }

    #[test]
    fn test_demotion_after_sustained_far() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let filter = BeaconSignalFilter::new(&config);
        let mut status = status(&config);

        status.selected_step = SelectedStep { step: CarStepId::RearLeft, force_located: false };
        status.distance = DistanceObservation {
            proximity: Proximity::Immediate,
            meters: Some(0.5),
            stable_count: 5,
        };

        let far = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Far, meters: 6.0 };

        // Far samples 1-6: still selected
        for expected_count in 1..=6u32 {
            let effect = filter.apply(&mut status, &far);
            assert_eq!(effect, RangedEffect::Updated);
            assert_eq!(status.distance.stable_count, expected_count);
            assert_eq!(status.selected_step.step, CarStepId::RearLeft);
        }

        // Sample 7: count 7 > 6, selection cleared
        let effect = filter.apply(&mut status, &far);
        assert_eq!(effect, RangedEffect::StepCleared);
        assert_eq!(status.selected_step.step, CarStepId::Unknown);
    }

    #[test]
    fn test_unknown_proximity_does_not_demote() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let filter = BeaconSignalFilter::new(&config);
        let mut status = status(&config);

        status.selected_step = SelectedStep { step: CarStepId::RearLeft, force_located: false };

        let unknown = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Unknown, meters: -1.0 };
        for _ in 0..10 {
            filter.apply(&mut status, &unknown);
        }
        // Only sustained Far clears the selection
        assert_eq!(status.selected_step.step, CarStepId::RearLeft);
    }

    #[test]
    fn test_force_located_pins_selection() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let filter = BeaconSignalFilter::new(&config);
        let mut status = status(&config);

        status.selected_step = SelectedStep { step: CarStepId::FrontLeft, force_located: true };

        let sample = RangedCar { step: CarStepId::RearLeft, proximity: Proximity::Immediate, meters: 0.3 };
        for _ in 0..8 {
            assert_eq!(filter.apply(&mut status, &sample), RangedEffect::Pinned);
        }
        assert_eq!(status.selected_step.step, CarStepId::FrontLeft);
        // Pinned samples leave the distance observation untouched too
        assert_eq!(status.distance, DistanceObservation::default());
    }

    #[test]
    fn test_reset_clears_cycle_state() {
        let uuid = Uuid::now_v7();
        let config = config_with_uuid(uuid);
        let mut filter = BeaconSignalFilter::new(&config);

        filter.ingest(update(uuid, 1, smallvec![beacon(uuid, 1, Proximity::Near, 0.5)]));
        filter.ingest(update(uuid, 3, smallvec![]));
        filter.reset();

        assert_eq!(filter.empty_cycles(), 0);
        // A fresh empty cycle is the first of a new streak
        assert_eq!(filter.ingest(update(uuid, 1, smallvec![])), CycleOutcome::Empty);
        assert_eq!(filter.empty_cycles(), 1);
    }

    #[test]
    fn test_region_registry_dedup_and_idempotent_clear() {
        let uuid = Uuid::now_v7();
        let mut registry = RegionRegistry::new();
        let regions =
            vec![RegionKey { uuid, major: 1 }, RegionKey { uuid, major: 3 }];

        assert_eq!(registry.register(&regions), 2);
        // Duplicate registration adds nothing
        assert_eq!(registry.register(&regions), 0);
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        // Second clear is a no-op, not an error
        registry.clear();
        assert!(registry.is_empty());
    }
}
