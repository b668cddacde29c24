//! Site lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use common::config::GroupConfig;
use common::{Result, SiteRecord};
use tracing::debug;

/// Source of the sites that belong to a monitoring group.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// All sites of `group`, with or without geometry. An unknown group
    /// yields an empty list.
    async fn find_sites_for_group(&self, group: &str) -> Result<Vec<SiteRecord>>;
}

/// Site store backed by the `[[groups]]` tables of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteStore {
    groups: HashMap<String, Vec<SiteRecord>>,
}

impl StaticSiteStore {
    pub fn from_config(groups: &[GroupConfig]) -> Self {
        let groups = groups
            .iter()
            .map(|group| {
                let sites = group
                    .sites
                    .iter()
                    .map(|site| SiteRecord {
                        site_name: site.name.clone(),
                        geometry_wkt: site.geometry.clone(),
                        refresh_seconds: site.refresh_seconds,
                        group_default_refresh_seconds: group.default_refresh_seconds,
                    })
                    .collect();
                (group.name.clone(), sites)
            })
            .collect();
        Self { groups }
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

#[async_trait]
impl SiteStore for StaticSiteStore {
    async fn find_sites_for_group(&self, group: &str) -> Result<Vec<SiteRecord>> {
        match self.groups.get(group) {
            Some(sites) => Ok(sites.clone()),
            None => {
                debug!("Unknown group {}, no sites", group);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::SiteConfig;

    fn config() -> Vec<GroupConfig> {
        vec![GroupConfig {
            name: "north".into(),
            default_refresh_seconds: 86_400,
            sites: vec![
                SiteConfig {
                    name: "north-01".into(),
                    geometry: Some("POINT (1 1)".into()),
                    refresh_seconds: Some(3_600),
                },
                SiteConfig {
                    name: "north-02".into(),
                    geometry: None,
                    refresh_seconds: None,
                },
            ],
        }]
    }

    #[tokio::test]
    async fn test_static_store_carries_group_default() {
        let store = StaticSiteStore::from_config(&config());
        let sites = store.find_sites_for_group("north").await.unwrap();

        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].effective_refresh_seconds(), 3_600);
        assert_eq!(sites[1].effective_refresh_seconds(), 86_400);
        assert!(sites[1].geometry().is_none());
    }

    #[tokio::test]
    async fn test_unknown_group_is_empty() {
        let store = StaticSiteStore::from_config(&config());
        assert!(store.find_sites_for_group("south").await.unwrap().is_empty());
        assert_eq!(store.group_names().collect::<Vec<_>>(), ["north"]);
    }
}
