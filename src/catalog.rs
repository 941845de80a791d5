//! Registry of dataset descriptors, built-in and user supplied.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use log::debug;

use crate::{descriptor::DatasetDescriptor, error::MappingError};

const BUILTIN_DESCRIPTORS: &[&str] = &[include_str!("../descriptors/sihsus_aih_rd.yaml")];

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    descriptors: BTreeMap<String, Arc<DatasetDescriptor>>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Result<Self, MappingError> {
        let mut catalog = Self::empty();
        for text in BUILTIN_DESCRIPTORS {
            catalog.register(DatasetDescriptor::from_yaml_str(text)?)?;
        }
        Ok(catalog)
    }

    pub fn register(&mut self, descriptor: DatasetDescriptor) -> Result<(), MappingError> {
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(MappingError::Duplicate {
                dataset: descriptor.name.clone(),
                what: "dataset",
                name: descriptor.name,
            });
        }
        debug!(
            "Registered dataset '{}' ({} raw column(s), {} canonical column(s))",
            descriptor.name,
            descriptor.mapping.len(),
            descriptor.columns.len()
        );
        self.descriptors
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), MappingError> {
        self.register(DatasetDescriptor::load(path)?)
    }

    pub fn get(&self, name: &str) -> Result<Arc<DatasetDescriptor>, MappingError> {
        self.descriptors
            .get(name)
            .cloned()
            .ok_or_else(|| MappingError::UnknownDataset(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }
}
