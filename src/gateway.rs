//! Scripts, scenes and areas as seen from the hub
//!
//! Joins the REST state snapshot with the WebSocket registries. Registry
//! problems only cost area information; they never fail the listing.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::{EntityState, HassClient};
use crate::config::HassSettings;
use crate::error::{Degrade, RemoteError};
use crate::websocket;

/// Domains shown on the dashboard; everything else is ignored
pub const DOMAINS: [&str; 2] = ["script", "scene"];

/// Service used to activate both scripts and scenes
const ACTIVATE_SERVICE: &str = "turn_on";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub name: String,
    pub area_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    pub name: String,
}

/// Domain of an entity id: everything before the first `.`
pub fn domain_of(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map(|(domain, _)| domain)
        .unwrap_or(entity_id)
}

pub fn is_dashboard_entity(entity_id: &str) -> bool {
    entity_id
        .split_once('.')
        .is_some_and(|(domain, _)| DOMAINS.contains(&domain))
}

/// Access to the hub for everything the dashboard needs
#[derive(Debug, Clone)]
pub struct HassGateway {
    settings: HassSettings,
    client: HassClient,
}

impl HassGateway {
    pub fn new(settings: HassSettings) -> Result<Self, RemoteError> {
        let client = HassClient::new(&settings)?;
        Ok(Self { settings, client })
    }

    pub fn server_url(&self) -> &str {
        &self.settings.server
    }

    /// All scripts and scenes with their area, if one can be determined
    pub async fn list_entities(&self) -> Result<Vec<Entity>, RemoteError> {
        let states = self.client.get_states().await?;

        let registry_areas: HashMap<String, String> =
            websocket::list_entity_registry(&self.settings)
                .await
                .map(|entries| {
                    entries
                        .into_iter()
                        .filter_map(|e| Some((e.entity_id, e.area_id?)))
                        .collect()
                })
                .or_degrade("entity registry unavailable, areas unknown", HashMap::new());

        let entities = entities_from_states(&states, &registry_areas);
        log::debug!("Hub reports {} scripts and scenes", entities.len());
        Ok(entities)
    }

    /// Area id to name, from the realtime registry or the REST fallback
    pub async fn list_areas(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        let areas = match websocket::list_areas(&self.settings).await {
            Ok(areas) => areas,
            Err(err) => {
                log::warn!("Area registry over WebSocket failed ({err}), trying REST");
                self.client.get_area_registry().await?
            }
        };

        Ok(areas.into_iter().map(|a| (a.area_id, a.name)).collect())
    }

    /// Turn on a script or scene
    pub async fn activate(&self, entity_id: &str) -> Result<Value, RemoteError> {
        let domain = domain_of(entity_id);
        log::info!("Activating {entity_id} via {domain}.{ACTIVATE_SERVICE}");
        self.client
            .call_service(domain, ACTIVATE_SERVICE, &json!({ "entity_id": entity_id }))
            .await
    }
}

/// Keep scripts and scenes, naming them and resolving their area.
/// The registry assignment wins over a state attribute.
pub fn entities_from_states(
    states: &[EntityState],
    registry_areas: &HashMap<String, String>,
) -> Vec<Entity> {
    states
        .iter()
        .filter(|s| is_dashboard_entity(&s.entity_id))
        .map(|s| Entity {
            entity_id: s.entity_id.clone(),
            name: s.friendly_name().unwrap_or(&s.entity_id).to_string(),
            area_id: registry_areas
                .get(&s.entity_id)
                .cloned()
                .or_else(|| s.area_id().map(str::to_string)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state(entity_id: &str, attributes: Value) -> EntityState {
        EntityState {
            entity_id: entity_id.to_string(),
            state: "off".to_string(),
            attributes,
        }
    }

    fn gateway(server: &str) -> HassGateway {
        HassGateway::new(HassSettings {
            server: server.to_string(),
            token: "test-token".to_string(),
            timeout: 2,
            insecure: false,
        })
        .unwrap()
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("script.good_morning"), "script");
        assert_eq!(domain_of("scene.a.b"), "scene");
        assert_eq!(domain_of("nodot"), "nodot");
    }

    #[test]
    fn test_only_scripts_and_scenes_are_kept() {
        let states = vec![
            state("script.coffee", json!({"friendly_name": "Coffee"})),
            state("light.kitchen", json!({"friendly_name": "Kitchen"})),
            state("scene.movie", json!({})),
            state("scripts.lookalike", json!({})),
        ];

        let entities = entities_from_states(&states, &HashMap::new());
        let ids: Vec<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["script.coffee", "scene.movie"]);
        assert_eq!(entities[0].name, "Coffee");
        // No friendly name falls back to the id
        assert_eq!(entities[1].name, "scene.movie");
    }

    #[test]
    fn test_registry_area_wins_over_attribute() {
        let states = vec![
            state("script.coffee", json!({"area_id": "hallway"})),
            state("scene.movie", json!({"area_id": "living_room"})),
            state("scene.night", json!({})),
        ];
        let registry = HashMap::from([("script.coffee".to_string(), "kitchen".to_string())]);

        let entities = entities_from_states(&states, &registry);
        assert_eq!(entities[0].area_id.as_deref(), Some("kitchen"));
        assert_eq!(entities[1].area_id.as_deref(), Some("living_room"));
        assert_eq!(entities[2].area_id, None);
    }

    #[tokio::test]
    async fn test_list_entities_survives_missing_registry() {
        // wiremock speaks no WebSocket, so the registry fetch fails
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"entity_id": "script.coffee", "state": "off", "attributes": {"friendly_name": "Coffee"}},
                {"entity_id": "sensor.temp", "state": "21", "attributes": {}}
            ])))
            .mount(&server)
            .await;

        let entities = gateway(&server.uri()).list_entities().await.unwrap();
        assert_eq!(
            entities,
            vec![Entity {
                entity_id: "script.coffee".to_string(),
                name: "Coffee".to_string(),
                area_id: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_list_areas_falls_back_to_rest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/config/area_registry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"area_id": "kitchen", "name": "Kitchen"},
                {"area_id": "office", "name": "Office"}
            ])))
            .mount(&server)
            .await;

        let areas = gateway(&server.uri()).list_areas().await.unwrap();
        assert_eq!(areas.get("kitchen").map(String::as_str), Some("Kitchen"));
        assert_eq!(areas.len(), 2);
    }

    #[tokio::test]
    async fn test_list_areas_fails_when_everything_fails() {
        let server = MockServer::start().await;
        let areas = gateway(&server.uri()).list_areas().await;
        assert!(areas.is_err());
    }

    #[tokio::test]
    async fn test_activate_scopes_service_to_domain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/services/scene/turn_on"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server.uri())
            .activate("scene.movie")
            .await
            .unwrap();
    }
}
