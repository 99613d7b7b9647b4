//! Suburb-level zone reference data
//!
//! Loaded once by the caller and passed into the generator read-only.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};
use crate::fund::Zone;

/// One suburb row of the reference dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suburb {
    pub id: String,
    pub zone: Zone,
    /// Multiplier on the zone default rate
    pub risk_weight: f64,
    /// Expected annual price growth
    pub growth_mu: f64,
    /// Volatility of annual price growth
    pub growth_sigma: f64,
}

/// Read-only lookup of per-suburb overrides
pub trait ZoneDataSource: Send + Sync {
    /// Uniformly chosen suburb in `zone`, if the dataset covers it
    fn random_suburb(&self, zone: Zone, rng: &mut dyn RngCore) -> Option<&Suburb>;

    fn zone_metrics(&self, suburb_id: &str) -> Option<&Suburb>;
}

#[derive(Debug, Clone, Default)]
pub struct SuburbDataset {
    suburbs: Vec<Suburb>,
    by_id: HashMap<String, usize>,
    by_zone: BTreeMap<Zone, Vec<usize>>,
}

impl SuburbDataset {
    /// Load from a CSV with columns `id,zone,risk_weight,growth_mu,growth_sigma`
    pub fn load_from(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = csv::Reader::from_reader(file);

        let mut records = Vec::new();
        for row in reader.deserialize() {
            let suburb: Suburb = row?;
            records.push(suburb);
        }

        let dataset = Self::from_records(records)?;
        log::info!("Loaded {} suburbs from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn from_records(records: Vec<Suburb>) -> Result<Self> {
        let mut dataset = Self::default();
        for suburb in records {
            if !(suburb.risk_weight.is_finite() && suburb.risk_weight >= 0.0) {
                return Err(SimulationError::Dataset(format!(
                    "suburb {}: risk_weight {} must be non-negative",
                    suburb.id, suburb.risk_weight
                )));
            }
            if !(suburb.growth_mu.is_finite() && suburb.growth_mu > -1.0) {
                return Err(SimulationError::Dataset(format!(
                    "suburb {}: growth_mu {} must exceed -1",
                    suburb.id, suburb.growth_mu
                )));
            }
            if !(suburb.growth_sigma.is_finite() && suburb.growth_sigma >= 0.0) {
                return Err(SimulationError::Dataset(format!(
                    "suburb {}: growth_sigma {} must be non-negative",
                    suburb.id, suburb.growth_sigma
                )));
            }

            let index = dataset.suburbs.len();
            if dataset.by_id.insert(suburb.id.clone(), index).is_some() {
                return Err(SimulationError::Dataset(format!("duplicate suburb id {}", suburb.id)));
            }
            dataset.by_zone.entry(suburb.zone).or_default().push(index);
            dataset.suburbs.push(suburb);
        }
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.suburbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suburbs.is_empty()
    }

    pub fn suburbs_in(&self, zone: Zone) -> impl Iterator<Item = &Suburb> {
        self.by_zone
            .get(&zone)
            .into_iter()
            .flatten()
            .map(move |&i| &self.suburbs[i])
    }
}

impl ZoneDataSource for SuburbDataset {
    fn random_suburb(&self, zone: Zone, rng: &mut dyn RngCore) -> Option<&Suburb> {
        let index = self.by_zone.get(&zone)?.choose(rng)?;
        self.suburbs.get(*index)
    }

    fn zone_metrics(&self, suburb_id: &str) -> Option<&Suburb> {
        self.by_id.get(suburb_id).and_then(|&i| self.suburbs.get(i))
    }
}
