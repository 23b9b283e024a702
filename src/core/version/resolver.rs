use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::Transport;
use crate::core::profile::{Component, GameProfile};
use crate::core::state::StateStore;

use super::compare::{compare_versions, game_version_matches};
use super::manifest::VersionDocument;

/// Outcome of comparing the installed and the remote version of one
/// component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDecision {
    pub component: Component,
    pub needs_update: bool,
    pub remote_version: Option<String>,
    pub local_version: Option<String>,
    /// Set when the decision was made without full information.
    pub advisory: Option<String>,
}

/// Decides what is stale. The remote document is fetched at most once
/// per resolver.
pub struct VersionResolver {
    transport: Arc<dyn Transport>,
    store: StateStore,
    endpoint: String,
    game_version_override: Option<String>,
    document: OnceCell<Result<Arc<VersionDocument>, String>>,
}

impl VersionResolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: StateStore,
        endpoint: impl Into<String>,
        game_version_override: Option<String>,
    ) -> Self {
        Self {
            transport,
            store,
            endpoint: endpoint.into(),
            game_version_override,
            document: OnceCell::new(),
        }
    }

    /// The remote document, or the reason it could not be obtained.
    pub async fn document(&self) -> LauncherResult<Arc<VersionDocument>> {
        let cached = self
            .document
            .get_or_init(|| async {
                VersionDocument::fetch(self.transport.as_ref(), &self.endpoint)
                    .await
                    .map(Arc::new)
                    .map_err(|e| match e {
                        LauncherError::VersionEndpoint { reason, .. } => reason,
                        other => other.to_string(),
                    })
            })
            .await;

        cached.clone().map_err(|reason| LauncherError::VersionEndpoint {
            url: self.endpoint.clone(),
            reason,
        })
    }

    /// Installed game version: explicit override first, then the last
    /// recorded one.
    pub async fn detected_game_version(&self, profile: GameProfile) -> LauncherResult<Option<String>> {
        if let Some(version) = &self.game_version_override {
            return Ok(Some(version.clone()));
        }
        Ok(self
            .store
            .version_record(profile, Component::Game)
            .await?
            .and_then(|record| record.local_version))
    }

    pub async fn resolve(
        &self,
        profile: GameProfile,
        component: Component,
    ) -> LauncherResult<VersionDecision> {
        let local_version = match component {
            Component::Game => self.detected_game_version(profile).await?,
            Component::ModLoader => self
                .store
                .version_record(profile, component)
                .await?
                .and_then(|record| record.local_version),
        };

        let remote_version = match self.document().await {
            Ok(document) => match component {
                Component::Game => document.latest_supported_game().map(str::to_string),
                Component::ModLoader => Some(document.version.clone()),
            },
            Err(err) => return Ok(offline_decision(component, local_version, &err)),
        };

        let decision = match component {
            Component::Game => game_decision(local_version, remote_version),
            Component::ModLoader => compare_decision(component, local_version, remote_version),
        };
        info!(
            component = %component,
            local = ?decision.local_version,
            remote = ?decision.remote_version,
            needs_update = decision.needs_update,
            "Resolved version"
        );
        Ok(decision)
    }

    /// Refuses mod-loader/game combinations the service does not support.
    ///
    /// Returns an advisory when the check could not be performed.
    pub async fn check_compatibility(&self, profile: GameProfile) -> LauncherResult<Option<String>> {
        let document = match self.document().await {
            Ok(document) => document,
            Err(err) => {
                let advisory = format!("compatibility not checked: {err}");
                warn!("{}", advisory);
                return Ok(Some(advisory));
            }
        };

        let detected = self.detected_game_version(profile).await?;

        if document.incompatible {
            return Err(LauncherError::IncompatibleVersion {
                game_version: detected.unwrap_or_else(|| "unknown".into()),
                mod_version: Some(document.version.clone()),
                supported: document.supported_game_versions.clone(),
            });
        }

        let Some(detected) = detected else {
            let advisory = format!(
                "installed {} version unknown; pass --game-version to check compatibility",
                profile.display_name()
            );
            warn!("{}", advisory);
            return Ok(Some(advisory));
        };

        if !document.supports_game(&detected) {
            return Err(LauncherError::IncompatibleVersion {
                game_version: detected,
                mod_version: Some(document.version.clone()),
                supported: document.supported_game_versions.clone(),
            });
        }

        Ok(None)
    }
}

fn offline_decision(
    component: Component,
    local_version: Option<String>,
    err: &LauncherError,
) -> VersionDecision {
    match local_version {
        None => {
            let advisory = format!(
                "{component}: no installed version recorded and remote check failed ({err}); update required"
            );
            warn!("{}", advisory);
            VersionDecision {
                component,
                needs_update: true,
                remote_version: None,
                local_version: None,
                advisory: Some(advisory),
            }
        }
        Some(local) => {
            let advisory =
                format!("{component}: remote check failed ({err}); keeping installed {local}");
            warn!("{}", advisory);
            VersionDecision {
                component,
                needs_update: false,
                remote_version: None,
                local_version: Some(local),
                advisory: Some(advisory),
            }
        }
    }
}

/// The game is updated by the store client, so this only reports whether
/// a newer supported build exists. Builds are matched by prefix: "1.49"
/// covers "1.49.2.15s".
fn game_decision(local_version: Option<String>, remote_version: Option<String>) -> VersionDecision {
    let (needs_update, advisory) = match (&local_version, &remote_version) {
        (None, _) => {
            let advisory =
                "game: installed version unknown; cannot tell whether a newer supported build exists"
                    .to_string();
            warn!("{}", advisory);
            (false, Some(advisory))
        }
        (Some(_), None) => (false, None),
        (Some(local), Some(latest)) => (
            !game_version_matches(latest, local)
                && compare_versions(local, latest) == Ordering::Less,
            None,
        ),
    };

    VersionDecision {
        component: Component::Game,
        needs_update,
        remote_version,
        local_version,
        advisory,
    }
}

fn compare_decision(
    component: Component,
    local_version: Option<String>,
    remote_version: Option<String>,
) -> VersionDecision {
    let (needs_update, advisory) = match (&local_version, &remote_version) {
        (None, _) => (true, None),
        (Some(_), None) => (false, None),
        (Some(local), Some(remote)) => match compare_versions(local, remote) {
            Ordering::Less => (true, None),
            Ordering::Equal => (false, None),
            Ordering::Greater => {
                let advisory = format!(
                    "{component}: remote version {remote} is older than installed {local}; not downgrading"
                );
                warn!("{}", advisory);
                (false, Some(advisory))
            }
        },
    };

    VersionDecision {
        component,
        needs_update,
        remote_version,
        local_version,
        advisory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::testing::{Response, StaticTransport};

    const URL: &str = "http://version.test/v2/version";
    const SCENARIO_DOC: &str = r#"{"version":"5.2","supported_game_versions":["1.49"],"mirrors":["http://a","http://b"]}"#;

    fn resolver(
        transport: Arc<StaticTransport>,
        store: &StateStore,
        game_version: Option<&str>,
    ) -> VersionResolver {
        VersionResolver::new(
            transport,
            store.clone(),
            URL,
            game_version.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn stale_mod_loader_needs_update_and_compatible_game_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .record_version(GameProfile::Ets2, Component::ModLoader, "5.1", None)
            .await
            .unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.body(URL, SCENARIO_DOC);

        let resolver = resolver(transport.clone(), &store, Some("1.49"));
        assert_eq!(resolver.check_compatibility(GameProfile::Ets2).await.unwrap(), None);

        let decision = resolver
            .resolve(GameProfile::Ets2, Component::ModLoader)
            .await
            .unwrap();
        assert!(decision.needs_update);
        assert_eq!(decision.remote_version.as_deref(), Some("5.2"));
        assert_eq!(decision.local_version.as_deref(), Some("5.1"));

        // One fetch serves every question.
        resolver.resolve(GameProfile::Ets2, Component::Game).await.unwrap();
        assert_eq!(transport.documents(), 1);
    }

    #[tokio::test]
    async fn unsupported_game_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let transport = Arc::new(StaticTransport::new());
        transport.body(URL, SCENARIO_DOC);

        let err = resolver(transport, &store, Some("1.50"))
            .check_compatibility(GameProfile::Ets2)
            .await
            .unwrap_err();
        match err {
            LauncherError::IncompatibleVersion {
                game_version,
                supported,
                ..
            } => {
                assert_eq!(game_version, "1.50");
                assert_eq!(supported, vec!["1.49"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn service_side_incompatibility_flag_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let transport = Arc::new(StaticTransport::new());
        transport.body(
            URL,
            r#"{"version":"5.2","supported_game_versions":["1.49"],"mirrors":[],"incompatible":true}"#,
        );

        let err = resolver(transport, &store, Some("1.49"))
            .check_compatibility(GameProfile::Ets2)
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::IncompatibleVersion { .. }));
    }

    #[tokio::test]
    async fn failing_endpoint_without_baseline_requires_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let transport = Arc::new(StaticTransport::new());
        transport.route(URL, Response::Fail("timed out".into()));

        let decision = resolver(transport, &store, None)
            .resolve(GameProfile::Ats, Component::ModLoader)
            .await
            .unwrap();
        assert!(decision.needs_update);
        assert!(decision.advisory.is_some());
    }

    #[tokio::test]
    async fn failing_endpoint_with_baseline_keeps_installed() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .record_version(GameProfile::Ats, Component::ModLoader, "5.1", None)
            .await
            .unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.route(URL, Response::Status(500));

        let decision = resolver(transport, &store, None)
            .resolve(GameProfile::Ats, Component::ModLoader)
            .await
            .unwrap();
        assert!(!decision.needs_update);
        assert_eq!(decision.local_version.as_deref(), Some("5.1"));
        assert!(decision.advisory.is_some());
    }

    #[tokio::test]
    async fn remote_downgrade_is_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .record_version(GameProfile::Ets2, Component::ModLoader, "5.3", None)
            .await
            .unwrap();
        let transport = Arc::new(StaticTransport::new());
        transport.body(URL, SCENARIO_DOC);

        let decision = resolver(transport, &store, None)
            .resolve(GameProfile::Ets2, Component::ModLoader)
            .await
            .unwrap();
        assert!(!decision.needs_update);
        assert!(decision.advisory.unwrap().contains("not downgrading"));
    }

    #[tokio::test]
    async fn supported_patch_build_is_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let transport = Arc::new(StaticTransport::new());
        transport.body(URL, SCENARIO_DOC);

        let resolver = resolver(transport, &store, Some("1.49.2.15s"));
        assert_eq!(resolver.check_compatibility(GameProfile::Ets2).await.unwrap(), None);
        let decision = resolver.resolve(GameProfile::Ets2, Component::Game).await.unwrap();
        assert!(!decision.needs_update);
        assert_eq!(decision.advisory, None);
        assert_eq!(decision.remote_version.as_deref(), Some("1.49"));
    }

    #[tokio::test]
    async fn older_supported_build_reports_newer_game() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let transport = Arc::new(StaticTransport::new());
        transport.body(
            URL,
            r#"{"version":"5.2","supported_game_versions":["1.48","1.49"],"mirrors":[]}"#,
        );

        let decision = resolver(transport, &store, Some("1.48.3.1s"))
            .resolve(GameProfile::Ets2, Component::Game)
            .await
            .unwrap();
        assert!(decision.needs_update);
        assert_eq!(decision.advisory, None);
    }

    #[tokio::test]
    async fn unknown_game_version_is_not_an_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let transport = Arc::new(StaticTransport::new());
        transport.body(URL, SCENARIO_DOC);

        let decision = resolver(transport, &store, None)
            .resolve(GameProfile::Ets2, Component::Game)
            .await
            .unwrap();
        assert!(!decision.needs_update);
        assert!(decision.advisory.unwrap().contains("unknown"));
    }

    #[tokio::test]
    async fn unknown_game_version_skips_check_with_advisory() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let transport = Arc::new(StaticTransport::new());
        transport.body(URL, SCENARIO_DOC);

        let advisory = resolver(transport, &store, None)
            .check_compatibility(GameProfile::Ets2)
            .await
            .unwrap();
        assert!(advisory.is_some());
    }
}
