use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tessera_primitives::TrackerId;

use super::*;

fn tracker() -> TrackerId {
	TrackerId::next()
}

fn located(t: TrackerId, instance: u64, x: f32, payload: u8) -> RawTrackable<u8> {
	RawTrackable {
		id: TrackableId::new(t, instance),
		location: Location::tracking(Pose::at([x, 0.0, 0.0])),
		payload,
	}
}

fn failed(t: TrackerId, instance: u64, payload: u8) -> RawTrackable<u8> {
	RawTrackable {
		id: TrackableId::new(t, instance),
		location: Location::Failed,
		payload,
	}
}

fn ids<P>(records: &[Trackable<P>]) -> Vec<u64> {
	records.iter().map(|r| r.id.instance).collect()
}

#[test]
fn two_frame_scenario() {
	let t = tracker();
	let mut live = TrackableSet::new();

	let first = reduce(&mut live, Ok(vec![located(t, 1, 0.0, 0), located(t, 2, 1.0, 0)]));
	assert_eq!(ids(&first.added), vec![1, 2]);
	assert!(first.updated.is_empty());
	assert!(first.removed.is_empty());

	let second = reduce(&mut live, Ok(vec![located(t, 1, 0.5, 0), located(t, 3, 2.0, 0)]));
	assert_eq!(ids(&second.added), vec![3]);
	assert_eq!(ids(&second.updated), vec![1]);
	assert_eq!(second.removed, vec![TrackableId::new(t, 2)]);
	assert_eq!(live.len(), 2);
	assert_eq!(live.get(TrackableId::new(t, 1)).map(|r| r.pose.position[0]), Some(0.5));
}

#[test]
fn unchanged_observation_is_not_an_update() {
	let t = tracker();
	let mut live = TrackableSet::new();
	reduce(&mut live, Ok(vec![located(t, 1, 0.0, 9)]));
	let again = reduce(&mut live, Ok(vec![located(t, 1, 0.0, 9)]));
	assert!(again.is_empty());
}

#[test]
fn payload_change_is_an_update() {
	let t = tracker();
	let mut live = TrackableSet::new();
	reduce(&mut live, Ok(vec![located(t, 1, 0.0, 1)]));
	let changed = reduce(&mut live, Ok(vec![located(t, 1, 0.0, 2)]));
	assert_eq!(ids(&changed.updated), vec![1]);
	assert_eq!(changed.updated[0].payload, 2);
}

#[test]
fn failed_poll_is_no_change() {
	let t = tracker();
	let mut live = TrackableSet::new();
	reduce(&mut live, Ok(vec![located(t, 1, 0.0, 0)]));
	let before = live.clone();
	let changes = reduce(&mut live, Err(NativeError::Code(-1)));
	assert!(changes.is_empty());
	assert_eq!(live, before);
}

#[test]
fn empty_observation_removes_everything() {
	let t = tracker();
	let mut live = TrackableSet::new();
	reduce(&mut live, Ok(vec![located(t, 2, 0.0, 0), located(t, 1, 0.0, 0)]));
	let changes = reduce(&mut live, Ok(Vec::new()));
	assert_eq!(changes.removed, vec![TrackableId::new(t, 1), TrackableId::new(t, 2)]);
	assert!(live.is_empty());
}

#[test]
fn failed_location_keeps_pose_and_drops_tracking() {
	let t = tracker();
	let mut live = TrackableSet::new();
	reduce(&mut live, Ok(vec![located(t, 1, 4.0, 0)]));
	let changes = reduce(&mut live, Ok(vec![failed(t, 1, 0)]));
	assert_eq!(changes.updated.len(), 1);
	assert_eq!(changes.updated[0].pose, Pose::at([4.0, 0.0, 0.0]));
	assert_eq!(changes.updated[0].tracking, TrackingState::None);

	let again = reduce(&mut live, Ok(vec![failed(t, 1, 0)]));
	assert!(again.is_empty());
}

#[test]
fn failed_location_on_new_id_uses_identity() {
	let t = tracker();
	let mut live = TrackableSet::new();
	let changes = reduce(&mut live, Ok(vec![failed(t, 5, 0)]));
	assert_eq!(changes.added[0].pose, Pose::IDENTITY);
	assert_eq!(changes.added[0].tracking, TrackingState::None);
}

#[test]
fn duplicate_ids_resolve_last_wins() {
	let t = tracker();
	let mut live = TrackableSet::new();
	let changes = reduce(&mut live, Ok(vec![located(t, 1, 1.0, 1), located(t, 2, 0.0, 0), located(t, 1, 2.0, 7)]));
	assert_eq!(ids(&changes.added), vec![1, 2]);
	assert_eq!(changes.added[0].payload, 7);
	assert_eq!(changes.added[0].pose, Pose::at([2.0, 0.0, 0.0]));
}

fn arb_observation(t: TrackerId) -> impl Strategy<Value = Vec<RawTrackable<u8>>> {
	prop::collection::vec(
		(0u64..12, prop::option::of(0u8..3), 0u8..3).prop_map(move |(instance, x, payload)| match x {
			Some(x) => located(t, instance, f32::from(x), payload),
			None => failed(t, instance, payload),
		}),
		0..16,
	)
}

fn arb_frames() -> impl Strategy<Value = (TrackerId, Vec<Option<Vec<RawTrackable<u8>>>>)> {
	let t = tracker();
	(Just(t), prop::collection::vec(prop::option::weighted(0.85, arb_observation(t)), 1..8))
}

proptest! {
	#[test]
	fn each_id_lands_in_at_most_one_list((_t, frames) in arb_frames()) {
		let mut live = TrackableSet::new();
		for frame in frames {
			let outcome = frame.ok_or(NativeError::Code(-1));
			let changes = reduce(&mut live, outcome);
			let mut all: Vec<TrackableId> = changes.added.iter().chain(&changes.updated).map(|r| r.id).collect();
			all.extend(&changes.removed);
			let total = all.len();
			all.sort();
			all.dedup();
			prop_assert_eq!(all.len(), total);
		}
	}

	#[test]
	fn live_set_matches_last_observation((_t, frames) in arb_frames()) {
		let mut live = TrackableSet::new();
		let mut expected: Option<Vec<TrackableId>> = None;
		for frame in frames {
			if let Some(obs) = &frame {
				let mut ids: Vec<_> = obs.iter().map(|r| r.id).collect();
				ids.sort();
				ids.dedup();
				expected = Some(ids);
			}
			reduce(&mut live, frame.ok_or(NativeError::Code(-1)));
		}
		let live_ids: Vec<_> = live.iter().map(|r| r.id).collect();
		prop_assert_eq!(live_ids, expected.unwrap_or_default());
	}

	#[test]
	fn changes_replay_onto_prior_set((_t, frames) in arb_frames()) {
		let mut live = TrackableSet::new();
		let mut mirror: BTreeMap<TrackableId, Trackable<u8>> = BTreeMap::new();
		for frame in frames {
			let changes = reduce(&mut live, frame.ok_or(NativeError::Code(-1)));
			for id in &changes.removed {
				prop_assert!(mirror.remove(id).is_some());
			}
			for record in changes.added {
				prop_assert!(mirror.insert(record.id, record).is_none());
			}
			for record in changes.updated {
				prop_assert!(mirror.insert(record.id, record).is_some());
			}
			let replayed: Vec<_> = mirror.values().cloned().collect();
			let actual: Vec<_> = live.iter().cloned().collect();
			prop_assert_eq!(replayed, actual);
		}
	}

	#[test]
	fn removed_is_sorted((_t, frames) in arb_frames()) {
		let mut live = TrackableSet::new();
		for frame in frames {
			let changes = reduce(&mut live, frame.ok_or(NativeError::Code(-1)));
			let mut sorted = changes.removed.clone();
			sorted.sort();
			prop_assert_eq!(changes.removed, sorted);
		}
	}
}
