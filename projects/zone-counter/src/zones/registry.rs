// Zone registry: zones, their counters and the occupancy history behind one lock
//
// Every operation takes the lock for its own duration only. The counting stage
// calls `count_cycle` once per detection result and draws from the returned
// copy, so nothing holds the lock while rendering or talking to the sink.

use super::geometry::{contains_point, to_geo_polygon, ZonePoint};
use super::occupancy::{OccupancyHistory, Transition};
use super::ZoneId;
use crate::error::ZoneError;
use crate::pipeline::detection::TrackedBox;
use chrono::{DateTime, Utc};
use geo_types::Polygon;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCounts {
    pub entries: u64,
    pub exits: u64,
    pub current: u64,
}

/// Zone definition accepted by `add_zone` and `replace_all_zones`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneSpec {
    #[serde(default)]
    pub id: Option<ZoneId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_points")]
    pub points: Vec<ZonePoint>,
    /// Seed counters, used to resume counts persisted by a collaborator
    #[serde(default)]
    pub initial_entries: u64,
    #[serde(default)]
    pub initial_exits: u64,
    #[serde(default)]
    pub initial_count: u64,
}

impl ZoneSpec {
    pub fn new(points: Vec<ZonePoint>) -> Self {
        Self {
            points,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: ZoneId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_counts(mut self, entries: u64, exits: u64, current: u64) -> Self {
        self.initial_entries = entries;
        self.initial_exits = exits;
        self.initial_count = current;
        self
    }
}

/// Partial update for `update_zone`. Counters are never touched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneUpdate {
    #[serde(default, deserialize_with = "deserialize_optional_points")]
    pub points: Option<Vec<ZonePoint>>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Points arrive either as `[x, y]` pairs or `{"x": .., "y": ..}` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum PointInput {
    Pair([f64; 2]),
    Object { x: f64, y: f64 },
}

impl From<PointInput> for ZonePoint {
    fn from(p: PointInput) -> Self {
        match p {
            PointInput::Pair([x, y]) | PointInput::Object { x, y } => [x as i32, y as i32],
        }
    }
}

fn deserialize_points<'de, D>(deserializer: D) -> Result<Vec<ZonePoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<PointInput>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(ZonePoint::from).collect())
}

fn deserialize_optional_points<'de, D>(deserializer: D) -> Result<Option<Vec<ZonePoint>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<PointInput>>::deserialize(deserializer)?;
    Ok(raw.map(|points| points.into_iter().map(ZonePoint::from).collect()))
}

/// Read-consistent copy of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneView {
    pub id: ZoneId,
    pub name: String,
    pub points: Vec<ZonePoint>,
    pub counts: ZoneCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneStats {
    pub name: String,
    pub entries: u64,
    pub exits: u64,
    pub current: u64,
}

/// Per-zone counters at one instant. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub zones: BTreeMap<ZoneId, ZoneStats>,
}

impl StatsSnapshot {
    pub fn from_views(views: &[ZoneView]) -> Self {
        let zones = views
            .iter()
            .map(|v| {
                (
                    v.id,
                    ZoneStats {
                        name: v.name.clone(),
                        entries: v.counts.entries,
                        exits: v.counts.exits,
                        current: v.counts.current,
                    },
                )
            })
            .collect();
        Self {
            taken_at: Utc::now(),
            zones,
        }
    }

    pub fn get(&self, id: ZoneId) -> Option<&ZoneStats> {
        self.zones.get(&id)
    }
}

struct Zone {
    id: ZoneId,
    name: String,
    points: Vec<ZonePoint>,
    polygon: Polygon<f64>,
    counts: ZoneCounts,
}

impl Zone {
    fn from_spec(id: ZoneId, spec: ZoneSpec) -> Self {
        let polygon = to_geo_polygon(&spec.points);
        Self {
            id,
            name: spec
                .name
                .unwrap_or_else(|| format!("Zone {}", id as u64 + 1)),
            points: spec.points,
            polygon,
            counts: ZoneCounts {
                entries: spec.initial_entries,
                exits: spec.initial_exits,
                current: spec.initial_count,
            },
        }
    }

    fn view(&self) -> ZoneView {
        ZoneView {
            id: self.id,
            name: self.name.clone(),
            points: self.points.clone(),
            counts: self.counts,
        }
    }
}

struct RegistryInner {
    zones: BTreeMap<ZoneId, Zone>,
    history: OccupancyHistory,
}

pub struct ZoneRegistry {
    inner: Mutex<RegistryInner>,
}

fn validate_points(points: &[ZonePoint]) -> Result<(), ZoneError> {
    if points.len() < 3 {
        return Err(ZoneError::InvalidPolygon(points.len()));
    }
    Ok(())
}

fn next_id(zones: &BTreeMap<ZoneId, Zone>) -> Result<ZoneId, ZoneError> {
    match zones.keys().next_back() {
        None => Ok(0),
        Some(&max) => max.checked_add(1).ok_or(ZoneError::AlreadyExists(max)),
    }
}

impl ZoneRegistry {
    pub fn new(history_len: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                zones: BTreeMap::new(),
                history: OccupancyHistory::new(history_len),
            }),
        }
    }

    /// Add a single zone. Fails if the id is already in use.
    pub fn add_zone(&self, spec: ZoneSpec) -> Result<ZoneId, ZoneError> {
        validate_points(&spec.points)?;
        let mut inner = self.inner.lock();

        let id = match spec.id {
            Some(id) if inner.zones.contains_key(&id) => return Err(ZoneError::AlreadyExists(id)),
            Some(id) => id,
            None => next_id(&inner.zones)?,
        };

        let zone = Zone::from_spec(id, spec);
        tracing::info!("Added zone {} ({})", id, zone.name);
        inner.zones.insert(id, zone);
        Ok(id)
    }

    /// Replace polygon and/or name in place. Counters and track histories are kept,
    /// so a geometry change can register a transition on the next cycle.
    pub fn update_zone(&self, id: ZoneId, update: ZoneUpdate) -> Result<(), ZoneError> {
        if let Some(points) = &update.points {
            validate_points(points)?;
        }
        let mut inner = self.inner.lock();
        let zone = inner.zones.get_mut(&id).ok_or(ZoneError::NotFound(id))?;

        if let Some(points) = update.points {
            zone.polygon = to_geo_polygon(&points);
            zone.points = points;
        }
        if let Some(name) = update.name {
            zone.name = name;
        }
        tracing::info!("Updated zone {}", id);
        Ok(())
    }

    /// Remove a zone together with every track history that references it.
    pub fn delete_zone(&self, id: ZoneId) -> Result<(), ZoneError> {
        let mut inner = self.inner.lock();
        if inner.zones.remove(&id).is_none() {
            return Err(ZoneError::NotFound(id));
        }
        inner.history.purge_zone(id);
        tracing::info!("Deleted zone {}", id);
        Ok(())
    }

    /// Clear all zones and histories, then add `specs` in order.
    /// The whole list is validated first; on error nothing changes.
    pub fn replace_all_zones(&self, specs: Vec<ZoneSpec>) -> Result<Vec<ZoneId>, ZoneError> {
        for spec in &specs {
            validate_points(&spec.points)?;
        }

        let mut zones = BTreeMap::new();
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = match spec.id {
                Some(id) => id,
                None => next_id(&zones)?,
            };
            // A repeated id reuses the slot
            zones.insert(id, Zone::from_spec(id, spec));
            ids.push(id);
        }

        let mut inner = self.inner.lock();
        inner.zones = zones;
        inner.history.clear();
        tracing::info!("Replaced zone configuration ({} zones)", inner.zones.len());
        Ok(ids)
    }

    /// Owned copy of every zone, ordered by id.
    pub fn snapshot(&self) -> Vec<ZoneView> {
        self.inner.lock().zones.values().map(Zone::view).collect()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::from_views(&self.snapshot())
    }

    /// Run one counting cycle over a frame's tracked boxes and return the updated zones.
    ///
    /// `current` is rebuilt from zero every cycle; `entries` and `exits` only grow.
    pub fn count_cycle(&self, tracks: &[TrackedBox]) -> Vec<ZoneView> {
        let mut guard = self.inner.lock();
        let RegistryInner { zones, history } = &mut *guard;

        for zone in zones.values_mut() {
            zone.counts.current = 0;
        }

        for track in tracks {
            let [cx, cy] = track.anchor();
            for zone in zones.values_mut() {
                let inside = contains_point(&zone.polygon, cx as f64, cy as f64);
                match history.record(track.track_id, zone.id, inside) {
                    Some(Transition::Entered) => zone.counts.entries += 1,
                    Some(Transition::Exited) => zone.counts.exits += 1,
                    None => {}
                }
                if inside {
                    zone.counts.current += 1;
                }
            }
        }

        zones.values().map(Zone::view).collect()
    }

    /// Number of live (track, zone) histories.
    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new(super::occupancy::DEFAULT_HISTORY_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: [ZonePoint; 4] = [[0, 0], [100, 0], [100, 100], [0, 100]];

    fn at(track_id: u64, x: f32, y: f32) -> TrackedBox {
        TrackedBox {
            track_id,
            center: [x, y],
            extent: [10.0, 20.0],
        }
    }

    fn counts(registry: &ZoneRegistry, id: ZoneId) -> ZoneCounts {
        registry
            .snapshot()
            .into_iter()
            .find(|z| z.id == id)
            .map(|z| z.counts)
            .unwrap()
    }

    #[test]
    fn test_add_zone_assigns_ids() {
        let registry = ZoneRegistry::default();
        assert_eq!(registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap(), 0);
        assert_eq!(
            registry
                .add_zone(ZoneSpec::new(SQUARE.to_vec()).with_id(7))
                .unwrap(),
            7
        );
        assert_eq!(registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap(), 8);

        let names: Vec<String> = registry.snapshot().into_iter().map(|z| z.name).collect();
        assert_eq!(names, vec!["Zone 1", "Zone 8", "Zone 9"]);
    }

    #[test]
    fn test_add_zone_rejects_duplicates_and_bad_polygons() {
        let registry = ZoneRegistry::default();
        registry
            .add_zone(ZoneSpec::new(SQUARE.to_vec()).with_id(1))
            .unwrap();
        assert_eq!(
            registry.add_zone(ZoneSpec::new(SQUARE.to_vec()).with_id(1)),
            Err(ZoneError::AlreadyExists(1))
        );
        assert_eq!(
            registry.add_zone(ZoneSpec::new(vec![[0, 0], [1, 1]])),
            Err(ZoneError::InvalidPolygon(2))
        );
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_add_zone_keeps_seed_counters() {
        let registry = ZoneRegistry::default();
        let id = registry
            .add_zone(ZoneSpec::new(SQUARE.to_vec()).with_counts(12, 9, 3))
            .unwrap();
        assert_eq!(
            counts(&registry, id),
            ZoneCounts {
                entries: 12,
                exits: 9,
                current: 3
            }
        );

        // First cycle recomputes current but keeps the seeds
        registry.count_cycle(&[]);
        assert_eq!(
            counts(&registry, id),
            ZoneCounts {
                entries: 12,
                exits: 9,
                current: 0
            }
        );
    }

    #[test]
    fn test_square_scenario() {
        let registry = ZoneRegistry::default();
        let id = registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();

        let path = [(150.0, 50.0), (50.0, 50.0), (60.0, 40.0), (150.0, 40.0)];
        let mut currents = Vec::new();
        for (x, y) in path {
            registry.count_cycle(&[at(1, x, y)]);
            currents.push(counts(&registry, id).current);
        }

        assert_eq!(currents, vec![0, 1, 1, 0]);
        let c = counts(&registry, id);
        assert_eq!(c.entries, 1);
        assert_eq!(c.exits, 1);
    }

    #[test]
    fn test_steady_state_changes_nothing() {
        let registry = ZoneRegistry::default();
        let id = registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();

        for _ in 0..3 {
            registry.count_cycle(&[at(1, 50.0, 50.0), at(2, 500.0, 500.0)]);
        }
        let c = counts(&registry, id);
        assert_eq!(c.entries, 0);
        assert_eq!(c.exits, 0);
        assert_eq!(c.current, 1);
    }

    #[test]
    fn test_current_is_recomputed_each_cycle() {
        let registry = ZoneRegistry::default();
        let id = registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();

        registry.count_cycle(&[at(1, 10.0, 10.0), at(2, 20.0, 20.0), at(3, 30.0, 30.0)]);
        assert_eq!(counts(&registry, id).current, 3);

        // Tracks that are no longer reported do not linger in `current`
        registry.count_cycle(&[at(2, 20.0, 20.0)]);
        assert_eq!(counts(&registry, id).current, 1);

        registry.count_cycle(&[]);
        assert_eq!(counts(&registry, id).current, 0);
    }

    #[test]
    fn test_overlapping_zones_count_independently() {
        let registry = ZoneRegistry::default();
        let a = registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();
        let b = registry
            .add_zone(ZoneSpec::new(vec![[50, 50], [150, 50], [150, 150], [50, 150]]))
            .unwrap();

        registry.count_cycle(&[at(1, 75.0, 75.0)]);
        assert_eq!(counts(&registry, a).current, 1);
        assert_eq!(counts(&registry, b).current, 1);
    }

    #[test]
    fn test_center_on_edge_is_inside() {
        let registry = ZoneRegistry::default();
        let id = registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();
        registry.count_cycle(&[at(1, 100.0, 50.0)]);
        assert_eq!(counts(&registry, id).current, 1);
    }

    #[test]
    fn test_delete_purges_history() {
        let registry = ZoneRegistry::default();
        registry
            .add_zone(ZoneSpec::new(SQUARE.to_vec()).with_id(4))
            .unwrap();

        registry.count_cycle(&[at(1, 150.0, 50.0)]);
        assert_eq!(registry.history_len(), 1);

        registry.delete_zone(4).unwrap();
        assert_eq!(registry.history_len(), 0);
        assert_eq!(registry.delete_zone(4), Err(ZoneError::NotFound(4)));

        // Same id again: the earlier "outside" sample must not pair with this "inside" one
        registry
            .add_zone(ZoneSpec::new(SQUARE.to_vec()).with_id(4))
            .unwrap();
        registry.count_cycle(&[at(1, 50.0, 50.0)]);
        let c = counts(&registry, 4);
        assert_eq!(c.entries, 0);
        assert_eq!(c.current, 1);
    }

    #[test]
    fn test_update_keeps_counters_and_history() {
        let registry = ZoneRegistry::default();
        let id = registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();
        registry.count_cycle(&[at(1, 150.0, 50.0)]);
        registry.count_cycle(&[at(1, 50.0, 50.0)]);
        assert_eq!(counts(&registry, id).entries, 1);

        registry
            .update_zone(
                id,
                ZoneUpdate {
                    points: Some(vec![[0, 0], [200, 0], [200, 200], [0, 200]]),
                    name: Some("Lobby".into()),
                },
            )
            .unwrap();

        let view = registry.snapshot().remove(0);
        assert_eq!(view.name, "Lobby");
        assert_eq!(view.counts.entries, 1);
        assert_eq!(registry.history_len(), 1);

        // The widened polygon now contains the old "outside" position; history carries over
        registry.count_cycle(&[at(1, 150.0, 50.0)]);
        let c = counts(&registry, id);
        assert_eq!(c.entries, 1);
        assert_eq!(c.exits, 0);
        assert_eq!(c.current, 1);
    }

    #[test]
    fn test_update_errors_leave_zone_unchanged() {
        let registry = ZoneRegistry::default();
        let id = registry.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();

        assert_eq!(
            registry.update_zone(99, ZoneUpdate::default()),
            Err(ZoneError::NotFound(99))
        );
        assert_eq!(
            registry.update_zone(
                id,
                ZoneUpdate {
                    points: Some(vec![[0, 0]]),
                    name: Some("ignored".into()),
                }
            ),
            Err(ZoneError::InvalidPolygon(1))
        );
        let view = registry.snapshot().remove(0);
        assert_eq!(view.name, "Zone 1");
        assert_eq!(view.points, SQUARE.to_vec());
    }

    #[test]
    fn test_replace_all_resets_state() {
        let fresh = ZoneRegistry::default();
        let reused = ZoneRegistry::default();

        reused.add_zone(ZoneSpec::new(SQUARE.to_vec())).unwrap();
        reused.count_cycle(&[at(1, 150.0, 50.0)]);
        reused.count_cycle(&[at(1, 50.0, 50.0)]);
        reused.replace_all_zones(vec![]).unwrap();
        assert!(reused.snapshot().is_empty());
        assert_eq!(reused.history_len(), 0);

        let config = vec![
            ZoneSpec::new(SQUARE.to_vec()).with_name("A"),
            ZoneSpec::new(vec![[200, 0], [300, 0], [300, 100]]).with_name("B"),
        ];
        fresh.replace_all_zones(config.clone()).unwrap();
        reused.replace_all_zones(config).unwrap();

        let frames = [[at(1, 50.0, 50.0)], [at(1, 150.0, 50.0)], [at(1, 290.0, 10.0)]];
        for frame in &frames {
            fresh.count_cycle(frame);
            reused.count_cycle(frame);
        }
        assert_eq!(fresh.snapshot(), reused.snapshot());
    }

    #[test]
    fn test_replace_all_is_atomic_on_error() {
        let registry = ZoneRegistry::default();
        registry
            .add_zone(ZoneSpec::new(SQUARE.to_vec()).with_name("keep"))
            .unwrap();

        let result = registry.replace_all_zones(vec![
            ZoneSpec::new(SQUARE.to_vec()),
            ZoneSpec::new(vec![[0, 0], [1, 1]]),
        ]);
        assert_eq!(result, Err(ZoneError::InvalidPolygon(2)));
        assert_eq!(registry.snapshot()[0].name, "keep");
    }

    #[test]
    fn test_replace_all_assigns_and_reuses_ids() {
        let registry = ZoneRegistry::default();
        let ids = registry
            .replace_all_zones(vec![
                ZoneSpec::new(SQUARE.to_vec()).with_id(3).with_name("first"),
                ZoneSpec::new(SQUARE.to_vec()),
                ZoneSpec::new(SQUARE.to_vec()).with_id(3).with_name("second"),
            ])
            .unwrap();
        assert_eq!(ids, vec![3, 4, 3]);

        let zones = registry.snapshot();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].name, "second");
    }

    #[test]
    fn test_zone_spec_accepts_both_point_formats() {
        let json = r#"[
            {"id": 2, "name": "Door", "points": [[0, 0], [10.7, 0], [10, 10]]},
            {"points": [{"x": 0, "y": 0}, {"x": 5, "y": 0}, {"x": 5, "y": 5}], "initial_entries": 4}
        ]"#;
        let specs: Vec<ZoneSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(specs[0].id, Some(2));
        assert_eq!(specs[0].points, vec![[0, 0], [10, 0], [10, 10]]);
        assert_eq!(specs[1].points, vec![[0, 0], [5, 0], [5, 5]]);
        assert_eq!(specs[1].initial_entries, 4);

        let update: ZoneUpdate = serde_json::from_str(r#"{"name": "Hall"}"#).unwrap();
        assert!(update.points.is_none());
        assert_eq!(update.name.as_deref(), Some("Hall"));
    }

    #[test]
    fn test_stats_snapshot() {
        let registry = ZoneRegistry::default();
        registry
            .add_zone(ZoneSpec::new(SQUARE.to_vec()).with_id(5).with_name("Gate"))
            .unwrap();
        registry.count_cycle(&[at(1, 10.0, 10.0)]);

        let stats = registry.stats();
        let gate = stats.get(5).unwrap();
        assert_eq!(gate.name, "Gate");
        assert_eq!(gate.current, 1);
        assert!(stats.get(6).is_none());
    }
}
