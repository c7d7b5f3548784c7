//! Precomputed sphere-to-sphere distances and bearings.

use crate::geodesy;
use crate::types::SphereCollection;
use std::collections::HashMap;

/// Distance between an unordered pair of spheres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairDistance<'a> {
    pub a: &'a str,
    pub b: &'a str,
    pub distance_m: f64,
}

/// Distance and initial bearing for an ordered pair of spheres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceBearingEntry<'a> {
    pub origin: &'a str,
    pub destination: &'a str,
    pub distance_m: f64,
    pub bearing_deg: f64,
}

/// Dense n×n matrix in sphere collection order.
///
/// Self-pairs hold distance 0 and bearing 0 and are excluded from the entry
/// iterators.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    distances: Vec<f64>,
    bearings: Vec<f64>,
}

impl DistanceMatrix {
    /// Compute every pair. Distance is evaluated once per unordered pair and
    /// mirrored; bearing is evaluated for both directions.
    pub fn build(spheres: &SphereCollection) -> Self {
        let n = spheres.len();
        let records = spheres.records();
        let mut distances = vec![0.0; n * n];
        let mut bearings = vec![0.0; n * n];

        for i in 0..n {
            let from = records[i].location;
            for j in (i + 1)..n {
                let to = records[j].location;
                let d = geodesy::distance(from, to);
                distances[i * n + j] = d;
                distances[j * n + i] = d;
                bearings[i * n + j] = geodesy::bearing(from, to);
                bearings[j * n + i] = geodesy::bearing(to, from);
            }
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let index = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        tracing::debug!("Built {}x{} sphere distance matrix", n, n);

        Self {
            ids,
            index,
            distances,
            bearings,
        }
    }

    /// Number of spheres covered
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn distance_at(&self, from: usize, to: usize) -> f64 {
        self.distances[from * self.len() + to]
    }

    pub(crate) fn bearing_at(&self, from: usize, to: usize) -> f64 {
        self.bearings[from * self.len() + to]
    }

    pub fn distance(&self, from: &str, to: &str) -> Option<f64> {
        Some(self.distance_at(self.position(from)?, self.position(to)?))
    }

    pub fn bearing(&self, from: &str, to: &str) -> Option<f64> {
        Some(self.bearing_at(self.position(from)?, self.position(to)?))
    }

    /// Ordered entries leaving `from`, self-pair excluded.
    pub fn row(&self, from: usize) -> impl Iterator<Item = DistanceBearingEntry<'_>> + '_ {
        (0..self.len())
            .filter(move |&to| to != from)
            .map(move |to| self.entry(from, to))
    }

    /// One entry per unordered pair: n(n-1)/2 items.
    pub fn distance_entries(&self) -> impl Iterator<Item = PairDistance<'_>> + '_ {
        let n = self.len();
        (0..n).flat_map(move |i| {
            ((i + 1)..n).map(move |j| PairDistance {
                a: &self.ids[i],
                b: &self.ids[j],
                distance_m: self.distance_at(i, j),
            })
        })
    }

    /// One entry per ordered pair of distinct spheres: n(n-1) items.
    pub fn bearing_entries(&self) -> impl Iterator<Item = DistanceBearingEntry<'_>> + '_ {
        (0..self.len()).flat_map(move |i| self.row(i))
    }

    fn entry(&self, from: usize, to: usize) -> DistanceBearingEntry<'_> {
        DistanceBearingEntry {
            origin: &self.ids[from],
            destination: &self.ids[to],
            distance_m: self.distance_at(from, to),
            bearing_deg: self.bearing_at(from, to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoPoint, SphereRecord};
    use url::Url;

    fn collection(points: &[(&str, f64, f64)]) -> SphereCollection {
        let records = points
            .iter()
            .map(|(id, lat, lon)| SphereRecord {
                id: id.to_string(),
                location: GeoPoint::new(*lat, *lon),
                altitude: None,
                panorama: Url::parse(&format!("https://example.com/{}.jpg", id)).unwrap(),
                thumbnail: None,
                author: None,
                date: None,
                project: None,
                label: None,
            })
            .collect();
        SphereCollection::new(records).unwrap()
    }

    #[test]
    fn test_entry_counts() {
        for n in 0..6usize {
            let points: Vec<(String, f64, f64)> = (0..n)
                .map(|i| (format!("s{}", i), i as f64 * 0.1, i as f64 * -0.2))
                .collect();
            let refs: Vec<(&str, f64, f64)> =
                points.iter().map(|(id, a, b)| (id.as_str(), *a, *b)).collect();
            let matrix = DistanceMatrix::build(&collection(&refs));

            assert_eq!(matrix.len(), n);
            assert_eq!(matrix.is_empty(), n == 0);
            assert_eq!(matrix.distance("s0", "missing"), None);
            assert_eq!(matrix.distance_entries().count(), n * n.saturating_sub(1) / 2);
            assert_eq!(matrix.bearing_entries().count(), n * n.saturating_sub(1));
        }
    }

    #[test]
    fn test_self_pairs_and_symmetry() {
        let matrix = DistanceMatrix::build(&collection(&[
            ("node1", 0.0, 0.0),
            ("node2", 0.0, 1.0),
            ("node3", 1.0, 0.0),
        ]));

        for id in ["node1", "node2", "node3"] {
            assert_eq!(matrix.distance(id, id), Some(0.0));
            assert_eq!(matrix.bearing(id, id), Some(0.0));
        }
        assert_eq!(matrix.distance("node1", "node2"), matrix.distance("node2", "node1"));
        assert_eq!(matrix.distance("node1", "node3"), matrix.distance("node3", "node1"));
        assert!(matrix.distance("node1", "missing").is_none());
    }

    #[test]
    fn test_bearings_per_direction() {
        let matrix = DistanceMatrix::build(&collection(&[("node1", 0.0, 0.0), ("node2", 0.0, 1.0)]));

        let east = matrix.bearing("node1", "node2").unwrap();
        let west = matrix.bearing("node2", "node1").unwrap();
        assert!(80.0 < east && east < 100.0, "east {}", east);
        assert!(260.0 < west && west < 280.0, "west {}", west);
    }

    #[test]
    fn test_matches_geodesy_engine() {
        let spheres = collection(&[("s1", 78.22, 15.65), ("s2", 78.92, 11.93)]);
        let matrix = DistanceMatrix::build(&spheres);
        let a = spheres.get("s1").unwrap().location;
        let b = spheres.get("s2").unwrap().location;

        assert_eq!(matrix.distance("s1", "s2"), Some(geodesy::distance(a, b)));
        assert_eq!(matrix.bearing("s1", "s2"), Some(geodesy::bearing(a, b)));
        assert_eq!(matrix.bearing("s2", "s1"), Some(geodesy::bearing(b, a)));
    }

    #[test]
    fn test_build_is_deterministic() {
        let spheres = collection(&[
            ("a", 45.8326, 6.8586),
            ("b", 45.8426, 6.8586),
            ("c", 45.8326, 6.8686),
            ("d", 45.8226, 6.8486),
        ]);
        assert_eq!(DistanceMatrix::build(&spheres), DistanceMatrix::build(&spheres));
    }

    #[test]
    fn test_row_excludes_origin() {
        let matrix = DistanceMatrix::build(&collection(&[
            ("a", 0.0, 0.0),
            ("b", 0.0, 1.0),
            ("c", 1.0, 0.0),
        ]));
        let row: Vec<_> = matrix.row(0).map(|e| e.destination).collect();
        assert_eq!(row, vec!["b", "c"]);
    }
}
