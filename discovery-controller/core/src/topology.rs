use crate::{Region, ServiceName, Tag};
use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    sync::Arc,
};

/// The services registered in a single region and the tags of each.
///
/// Topologies are immutable and compare by value. Tags are held as sets so
/// that a registry reordering a service's tags does not register as a change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceTopology(Arc<BTreeMap<ServiceName, BTreeSet<Tag>>>);

/// A region's state as seen by the aggregator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RegionTopology {
    /// The region has not completed a successful query yet.
    #[default]
    NoData,

    /// The latest topology observed for the region. May be empty.
    Synced(ServiceTopology),
}

/// The merged view of every watched region.
///
/// A snapshot always holds an entry for each region the session watches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    regions: BTreeMap<Region, RegionTopology>,
}

/// A service flattened across regions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceMeta {
    pub name: ServiceName,
    pub regions: BTreeSet<Region>,
    pub tags: BTreeSet<Tag>,
}

// === impl ServiceTopology ===

impl ServiceTopology {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.0.contains_key(service)
    }

    pub fn tags(&self, service: &str) -> Option<&BTreeSet<Tag>> {
        self.0.get(service)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ServiceName, BTreeSet<Tag>> {
        self.0.iter()
    }

    pub fn service_names(&self) -> impl Iterator<Item = &ServiceName> {
        self.0.keys()
    }
}

impl<T> FromIterator<(ServiceName, T)> for ServiceTopology
where
    T: IntoIterator<Item = Tag>,
{
    fn from_iter<I: IntoIterator<Item = (ServiceName, T)>>(iter: I) -> Self {
        let services = iter
            .into_iter()
            .map(|(name, tags)| (name, tags.into_iter().collect()))
            .collect();
        Self(Arc::new(services))
    }
}

impl<'t> IntoIterator for &'t ServiceTopology {
    type Item = (&'t ServiceName, &'t BTreeSet<Tag>);
    type IntoIter = btree_map::Iter<'t, ServiceName, BTreeSet<Tag>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// === impl RegionTopology ===

impl RegionTopology {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }

    pub fn topology(&self) -> Option<&ServiceTopology> {
        match self {
            Self::Synced(topology) => Some(topology),
            Self::NoData => None,
        }
    }
}

// === impl Snapshot ===

impl Snapshot {
    /// Creates a snapshot in which every region has no data yet.
    pub fn pending<I>(regions: I) -> Self
    where
        I: IntoIterator<Item = Region>,
    {
        Self {
            regions: regions
                .into_iter()
                .map(|region| (region, RegionTopology::NoData))
                .collect(),
        }
    }

    /// Records `topology` as the latest state of `region`.
    ///
    /// Returns false (leaving the snapshot unchanged) when the region is not
    /// part of this snapshot.
    pub fn set(&mut self, region: &str, topology: ServiceTopology) -> bool {
        match self.regions.get_mut(region) {
            Some(state) => {
                *state = RegionTopology::Synced(topology);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, region: &str) -> Option<&RegionTopology> {
        self.regions.get(region)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Region, RegionTopology> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Returns true once every region has completed a successful query.
    pub fn is_synced(&self) -> bool {
        self.regions.values().all(RegionTopology::is_synced)
    }

    /// Flattens the snapshot into one entry per service name, sorted by name.
    ///
    /// Regions without data contribute nothing.
    pub fn services(&self) -> Vec<ServiceMeta> {
        let mut by_name = BTreeMap::<&ServiceName, ServiceMeta>::new();
        for (region, state) in &self.regions {
            let Some(topology) = state.topology() else {
                continue;
            };
            for (name, tags) in topology {
                let meta = by_name.entry(name).or_insert_with(|| ServiceMeta {
                    name: name.clone(),
                    ..Default::default()
                });
                meta.regions.insert(region.clone());
                meta.tags.extend(tags.iter().cloned());
            }
        }
        by_name.into_values().collect()
    }
}
