//! The backend: every endpoint of a project, grouped by region.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ModelError;

use super::endpoint::{Endpoint, EndpointKey};

/// Endpoints of one region, keyed by id.
pub type RegionalEndpoints = BTreeMap<String, Endpoint>;

/// The full endpoint graph of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Region -> endpoint id -> endpoint.
    #[serde(default)]
    pub endpoints: BTreeMap<String, RegionalEndpoints>,
    /// API name -> reason it is required.
    #[serde(default, rename = "requiredAPIs")]
    pub required_apis: BTreeMap<String, String>,
    /// Default environment variables for every endpoint.
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
}

/// Wire form of a backend as written by discovery: a flat endpoint list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendManifest {
    #[serde(default)]
    endpoints: Vec<Endpoint>,
    #[serde(default, rename = "requiredAPIs")]
    required_apis: BTreeMap<String, String>,
    #[serde(default)]
    environment_variables: BTreeMap<String, String>,
}

impl Backend {
    /// Creates an empty backend.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a backend from a list of endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if two endpoints share a region and id.
    pub fn of(endpoints: impl IntoIterator<Item = Endpoint>) -> Result<Self, ModelError> {
        let mut backend = Self::empty();
        for endpoint in endpoints {
            backend.insert(endpoint)?;
        }
        Ok(backend)
    }

    /// Parses a discovery manifest (flat endpoint list) from YAML or JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be parsed or contains duplicates.
    pub fn from_manifest(content: &str) -> Result<Self, ModelError> {
        let manifest: BackendManifest =
            serde_yaml::from_str(content).map_err(|e| ModelError::Unrecognized {
                name: String::from("backend manifest"),
                reason: e.to_string(),
            })?;

        let mut backend = Self::of(manifest.endpoints)?;
        backend.required_apis = manifest.required_apis;
        backend.environment_variables = manifest.environment_variables;
        Ok(backend)
    }

    /// Inserts an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint with the same region and id exists.
    pub fn insert(&mut self, endpoint: Endpoint) -> Result<(), ModelError> {
        let region = self.endpoints.entry(endpoint.region.clone()).or_default();
        if region.contains_key(&endpoint.id) {
            return Err(ModelError::DuplicateEndpoint {
                region: endpoint.region,
                id: endpoint.id,
            });
        }
        region.insert(endpoint.id.clone(), endpoint);
        Ok(())
    }

    /// Returns the endpoint with the given key.
    #[must_use]
    pub fn get(&self, key: &EndpointKey) -> Option<&Endpoint> {
        self.endpoints
            .get(&key.region)
            .and_then(|r| r.get(&key.id))
            .filter(|e| e.project == key.project)
    }

    /// Returns true if the backend holds the endpoint.
    #[must_use]
    pub fn has_endpoint(&self, endpoint: &Endpoint) -> bool {
        self.endpoints
            .get(&endpoint.region)
            .is_some_and(|r| r.contains_key(&endpoint.id))
    }

    /// Returns the endpoints of a region, or an empty map.
    #[must_use]
    pub fn regional(&self, region: &str) -> RegionalEndpoints {
        self.endpoints.get(region).cloned().unwrap_or_default()
    }

    /// Iterates over every endpoint.
    pub fn all_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values().flat_map(BTreeMap::values)
    }

    /// Iterates mutably over every endpoint.
    pub fn all_endpoints_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.endpoints.values_mut().flat_map(BTreeMap::values_mut)
    }

    /// Returns true if any endpoint satisfies the predicate.
    pub fn some_endpoint(&self, predicate: impl Fn(&Endpoint) -> bool) -> bool {
        self.all_endpoints().any(predicate)
    }

    /// Returns the number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.values().map(BTreeMap::len).sum()
    }

    /// Returns true if the backend has no endpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the regions that hold at least one endpoint.
    #[must_use]
    pub fn regions(&self) -> Vec<&str> {
        self.endpoints
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HttpsTrigger, Platform, Trigger};

    fn endpoint(region: &str, id: &str) -> Endpoint {
        Endpoint::new(
            EndpointKey::new("proj", region, id),
            Platform::V1,
            "nodejs20",
            id,
            Trigger::HttpsTrigger(HttpsTrigger::default()),
        )
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let result = Backend::of([endpoint("us-central1", "a"), endpoint("us-central1", "a")]);
        assert!(matches!(result, Err(ModelError::DuplicateEndpoint { .. })));
    }

    #[test]
    fn test_same_id_different_regions() {
        let backend = Backend::of([endpoint("us-central1", "a"), endpoint("europe-west1", "a")])
            .expect("distinct regions");
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.regions(), vec!["europe-west1", "us-central1"]);
        assert!(backend.get(&EndpointKey::new("proj", "europe-west1", "a")).is_some());
        assert!(backend.get(&EndpointKey::new("other", "europe-west1", "a")).is_none());
    }

    #[test]
    fn test_from_manifest() {
        let manifest = r"
requiredAPIs:
  cloudscheduler.googleapis.com: scheduled functions
endpoints:
  - id: nightly
    region: us-central1
    project: proj
    platform: v1
    runtime: nodejs20
    entryPoint: nightly
    scheduleTrigger:
      schedule: every 24 hours
";
        let backend = Backend::from_manifest(manifest).expect("valid manifest");
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.required_apis.len(), 1);
    }
}
