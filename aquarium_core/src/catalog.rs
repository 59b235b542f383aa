//! Fish catalog intake.
//!
//! The catalog is an external collection of fish definitions. Sessions
//! subscribe to it and stage additions/removals; the tick scheduler applies
//! them at the next tick boundary. A purchase only ever appends one
//! definition.

use crate::error::AquariumError;
use crate::lock;
use aquarium_env::{ChangeCallback, ChangeEvent, StateStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Where a purchased fish first appears.
pub const PURCHASE_SPAWN_POINT: [f64; 3] = [0.0, 2.0, 0.0];

const SPECIES: [(&str, &str); 6] = [
    ("clownfish", "#ff7f27"),
    ("blue tang", "#1e6fd9"),
    ("neon tetra", "#39c5e6"),
    ("yellow tang", "#ffd23f"),
    ("angelfish", "#c0c0c0"),
    ("guppy", "#e04fa0"),
];

fn default_color() -> String {
    "#ff9933".to_string()
}

fn default_size() -> f64 {
    1.0
}

fn default_base_speed() -> f64 {
    2.0
}

/// How a definition entered the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FishSource {
    #[default]
    Catalog,
    Purchase,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FishDefinition {
    pub id: String,

    /// Stable ordering key; also selects the personality archetype and the
    /// spawn jitter stream
    #[serde(default)]
    pub slot: u64,

    pub name: String,
    pub species: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_size")]
    pub size: f64,

    #[serde(default = "default_base_speed")]
    pub base_speed: f64,

    /// Initial position in tank coordinates
    #[serde(default)]
    pub position: [f64; 3],

    #[serde(default)]
    pub source: FishSource,
}

impl FishDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, species: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slot: 0,
            name: name.into(),
            species: species.into(),
            color: default_color(),
            size: default_size(),
            base_speed: default_base_speed(),
            position: [0.0; 3],
            source: FishSource::Catalog,
        }
    }

    /// Decodes a catalog record, rejecting values the simulation cannot use.
    pub fn from_record(record: &serde_json::Value) -> Result<Self, AquariumError> {
        let definition: Self = serde_json::from_value(record.clone())?;
        if definition.id.is_empty() {
            return Err(AquariumError::invalid_record("fish definition without id"));
        }
        if !(definition.base_speed.is_finite() && definition.base_speed >= 0.0) {
            return Err(AquariumError::invalid_record(format!(
                "fish {} has invalid baseSpeed {}",
                definition.id, definition.base_speed
            )));
        }
        if !definition.position.iter().all(|v| v.is_finite()) {
            return Err(AquariumError::invalid_record(format!(
                "fish {} has non-finite position",
                definition.id
            )));
        }
        Ok(definition)
    }

    pub fn to_record(&self) -> Result<serde_json::Value, AquariumError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// An external checkout completed for a fish of the given species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEvent {
    pub species: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl PurchaseEvent {
    pub fn new(species: impl Into<String>) -> Self {
        Self {
            species: species.into(),
            name: None,
            color: None,
        }
    }
}

/// Turns a purchase into exactly one new catalog definition and writes it.
pub async fn record_purchase<S>(
    store: &S,
    collection: &str,
    event: &PurchaseEvent,
) -> Result<FishDefinition, AquariumError>
where
    S: StateStore + ?Sized,
{
    let uuid = Uuid::new_v4();
    let id = format!("purchase-{}", uuid);
    let color = event.color.clone().unwrap_or_else(|| {
        SPECIES
            .iter()
            .find(|(species, _)| *species == event.species)
            .map(|(_, color)| color.to_string())
            .unwrap_or_else(default_color)
    });

    let definition = FishDefinition {
        slot: uuid.as_u64_pair().0,
        name: event.name.clone().unwrap_or_else(|| event.species.clone()),
        color,
        position: PURCHASE_SPAWN_POINT,
        source: FishSource::Purchase,
        ..FishDefinition::new(id, "", event.species.clone())
    };

    store.put(collection, &definition.id, definition.to_record()?).await?;
    info!(fish = %definition.id, species = %definition.species, "purchase added a fish");
    Ok(definition)
}

/// Writes a batch of definitions (initial catalog population).
pub async fn seed_catalog<S>(
    store: &S,
    collection: &str,
    definitions: &[FishDefinition],
) -> Result<(), AquariumError>
where
    S: StateStore + ?Sized,
{
    for definition in definitions {
        store.put(collection, &definition.id, definition.to_record()?).await?;
    }
    Ok(())
}

/// A deterministic starter population spread across the tank floor plan.
pub fn starter_catalog(count: usize) -> Vec<FishDefinition> {
    (0..count)
        .map(|i| {
            let (species, color) = SPECIES[i % SPECIES.len()];
            let column = (i % 6) as f64 - 2.5;
            let row = (i / 6) as f64;
            FishDefinition {
                slot: i as u64,
                color: color.to_string(),
                size: 0.8 + 0.1 * (i % 5) as f64,
                base_speed: 1.5 + 0.25 * (i % 4) as f64,
                position: [column * 4.0, -2.0 + (row % 4.0) * 2.5, ((i % 3) as f64 - 1.0) * 3.0],
                ..FishDefinition::new(format!("fish-{:03}", i), format!("{} {}", species, i), species)
            }
        })
        .collect()
}

/// A staged catalog change.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogChange {
    Upsert(FishDefinition),
    Remove(String),
}

/// Staging buffer filled by the catalog subscription, drained each tick.
#[derive(Debug, Clone, Default)]
pub struct CatalogStaging {
    pending: Arc<Mutex<Vec<CatalogChange>>>,
}

impl CatalogStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages one store notification. Undecodable records are logged and
    /// skipped.
    pub fn stage(&self, event: ChangeEvent) {
        let change = match &event {
            ChangeEvent::Upserted { id, record, .. } => match FishDefinition::from_record(record) {
                Ok(definition) if &definition.id == id => CatalogChange::Upsert(definition),
                Ok(definition) => {
                    warn!(record = %id, fish = %definition.id, "catalog record id mismatch; skipped");
                    return;
                }
                Err(err) => {
                    warn!(record = %id, %err, "unreadable catalog record; skipped");
                    return;
                }
            },
            ChangeEvent::Removed { id, .. } => CatalogChange::Remove(id.clone()),
        };
        lock(&self.pending).push(change);
    }

    /// Takes everything staged since the last drain, in arrival order.
    pub fn drain(&self) -> Vec<CatalogChange> {
        std::mem::take(&mut *lock(&self.pending))
    }

    /// Subscription callback feeding this buffer.
    pub fn callback(&self) -> ChangeCallback {
        let staging = self.clone();
        Arc::new(move |event| staging.stage(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upsert(id: &str, record: serde_json::Value) -> ChangeEvent {
        ChangeEvent::Upserted {
            collection: "fish".to_string(),
            id: id.to_string(),
            record,
        }
    }

    #[test]
    fn test_definition_defaults_fill_missing_fields() {
        let def = FishDefinition::from_record(&json!({ "id": "a", "name": "Nemo", "species": "clownfish" })).unwrap();
        assert_eq!(def.base_speed, 2.0);
        assert_eq!(def.position, [0.0; 3]);
        assert_eq!(def.source, FishSource::Catalog);
    }

    #[test]
    fn test_definition_rejects_bad_speed() {
        let err = FishDefinition::from_record(
            &json!({ "id": "a", "name": "N", "species": "s", "baseSpeed": -1.0 }),
        )
        .unwrap_err();
        assert!(matches!(err, AquariumError::InvalidRecord(_)));
    }

    #[test]
    fn test_staging_collects_in_order_and_skips_garbage() {
        let staging = CatalogStaging::new();
        let callback = staging.callback();

        callback(upsert("a", json!({ "id": "a", "name": "A", "species": "guppy" })));
        callback(upsert("b", json!({ "nonsense": true })));
        callback(ChangeEvent::Removed {
            collection: "fish".to_string(),
            id: "a".to_string(),
        });

        let drained = staging.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(&drained[0], CatalogChange::Upsert(d) if d.id == "a"));
        assert_eq!(drained[1], CatalogChange::Remove("a".to_string()));
        assert!(staging.drain().is_empty());
    }

    #[test]
    fn test_starter_catalog_is_deterministic() {
        let a = starter_catalog(8);
        let b = starter_catalog(8);
        assert_eq!(a, b);
        assert_eq!(a[3].slot, 3);
        assert_eq!(a[0].id, "fish-000");
    }
}
