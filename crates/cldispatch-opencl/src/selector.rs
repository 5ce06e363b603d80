//! Pluggable device selection.
//!
//! A [`DeviceSelector`] narrows the devices of the chosen platform with a
//! type filter and an optional capability predicate, optionally ranks the
//! survivors, and then picks one by index. The default selector takes the
//! first device of any type.

use std::cmp::Ordering;
use std::fmt;

use tracing::{debug, info};

use crate::config::SelectionConfig;
use crate::error::{DispatchError, Result};
use crate::platform::{Device, DeviceFilter};

type Predicate = Box<dyn Fn(&Device) -> bool + Send + Sync>;
type Ranking = Box<dyn Fn(&Device, &Device) -> Ordering + Send + Sync>;

/// Device selection policy.
pub struct DeviceSelector {
    filter: DeviceFilter,
    predicate: Option<Predicate>,
    ranking: Option<Ranking>,
    index: usize,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::first()
    }
}

impl DeviceSelector {
    /// The first device the platform reports.
    pub fn first() -> Self {
        Self { filter: DeviceFilter::All, predicate: None, ranking: None, index: 0 }
    }

    /// Restrict enumeration to one device class.
    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Keep only devices satisfying `predicate`.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&Device) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Order candidates with `compare` (best first) before indexing.
    /// The sort is stable, so ties keep enumeration order.
    pub fn ranked_by(
        mut self,
        compare: impl Fn(&Device, &Device) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.ranking = Some(Box::new(compare));
        self
    }

    /// Prefer devices with the most global memory.
    pub fn ranked_by_memory(self) -> Self {
        self.ranked_by(|a, b| b.global_mem_bytes().cmp(&a.global_mem_bytes()))
    }

    /// Take the `index`-th surviving candidate instead of the first.
    pub fn nth(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// The selector described by a `[selection]` configuration section.
    pub fn from_config(config: &SelectionConfig) -> Self {
        let mut selector = Self::first().with_filter(config.device_type).nth(config.device_index);
        if let Some(needle) = config.name_contains.as_deref().filter(|n| !n.is_empty()) {
            let needle = needle.to_lowercase();
            selector =
                selector.with_predicate(move |d: &Device| d.name().to_lowercase().contains(&needle));
        }
        selector
    }

    /// The device-type filter to enumerate with.
    pub fn filter(&self) -> DeviceFilter {
        self.filter
    }

    /// Choose one of `devices`, all enumerated from `platform`.
    pub fn select(&self, platform: &str, devices: Vec<Device>) -> Result<Device> {
        let total = devices.len();
        let mut candidates: Vec<Device> = match &self.predicate {
            Some(predicate) => devices.into_iter().filter(|d| predicate(d)).collect(),
            None => devices,
        };
        if let Some(ranking) = &self.ranking {
            candidates.sort_by(|a, b| ranking(a, b));
        }
        debug!(platform, total, candidates = candidates.len(), index = self.index, "selecting device");

        if self.index >= candidates.len() {
            return Err(DispatchError::NoMatchingDevice { platform: platform.to_string() });
        }
        let device = candidates.swap_remove(self.index);
        info!(device = %device.name(), device_type = %device.device_type(), "selected device");
        Ok(device)
    }
}

impl fmt::Debug for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSelector")
            .field("filter", &self.filter)
            .field("predicate", &self.predicate.is_some())
            .field("ranking", &self.ranking.is_some())
            .field("index", &self.index)
            .finish()
    }
}
