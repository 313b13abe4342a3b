//! Read-only listings of recorded hosts.
//!
//! Every call rescans the state store, so listings always reflect what is on
//! disk. Nothing here takes host locks: a host whose first snapshot is being
//! written may or may not appear.

use std::collections::BTreeMap;

use crate::state_store::{SnapshotRecord, StateStore, StateStoreError};

/// Enumerates hosts and their snapshot history.
#[derive(Clone, Debug)]
pub struct Inventory {
    store: StateStore,
}

impl Inventory {
    /// Creates an inventory over `store`.
    #[must_use]
    pub const fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// The store being enumerated.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Every recorded host grouped by provider. Providers without hosts are
    /// omitted and a missing store root yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Io`] when the store cannot be read.
    pub fn all_hosts(&self) -> Result<BTreeMap<String, Vec<String>>, StateStoreError> {
        let mut hosts = BTreeMap::new();
        for provider in self.store.list_providers()? {
            let names = self.hosts(&provider)?;
            hosts.insert(provider, names);
        }
        Ok(hosts)
    }

    /// Recorded hosts of one provider in sorted order. Unknown providers
    /// yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the provider name is invalid or the
    /// store cannot be read.
    pub fn hosts(&self, provider: &str) -> Result<Vec<String>, StateStoreError> {
        Ok(self.store.list_hosts(provider)?.into_iter().collect())
    }

    /// Snapshots recorded for a host, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the names are invalid or the log
    /// cannot be read.
    pub fn history(
        &self,
        provider: &str,
        host: &str,
    ) -> Result<Vec<SnapshotRecord>, StateStoreError> {
        self.store.history(provider, host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Action;
    use crate::state_store::SnapshotLog;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        inventory: Inventory,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("store"))
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        Fixture {
            _tmp: tmp,
            inventory: Inventory::new(StateStore::new(root)),
        }
    }

    fn record(fixture: &Fixture, provider: &str, host: &str, action: Action) {
        fixture
            .inventory
            .store()
            .append(provider, host, action, b"{}")
            .unwrap_or_else(|err| panic!("append: {err}"));
    }

    #[rstest]
    fn missing_root_lists_nothing(fixture: Fixture) {
        let all = fixture
            .inventory
            .all_hosts()
            .unwrap_or_else(|err| panic!("all_hosts: {err}"));
        assert!(all.is_empty());
        let hosts = fixture
            .inventory
            .hosts("none")
            .unwrap_or_else(|err| panic!("hosts: {err}"));
        assert!(hosts.is_empty());
    }

    #[rstest]
    fn hosts_are_grouped_by_provider(fixture: Fixture) {
        record(&fixture, "none", "web", Action::Create);
        record(&fixture, "none", "db", Action::Create);
        record(&fixture, "scaleway", "ci-1", Action::Create);
        record(&fixture, "none", "web", Action::Stop);

        let all = fixture
            .inventory
            .all_hosts()
            .unwrap_or_else(|err| panic!("all_hosts: {err}"));
        assert_eq!(
            all,
            BTreeMap::from([
                (
                    String::from("none"),
                    vec![String::from("db"), String::from("web")]
                ),
                (String::from("scaleway"), vec![String::from("ci-1")]),
            ])
        );
    }

    #[rstest]
    fn unknown_providers_have_no_hosts(fixture: Fixture) {
        record(&fixture, "none", "web", Action::Create);
        let hosts = fixture
            .inventory
            .hosts("ghost")
            .unwrap_or_else(|err| panic!("hosts: {err}"));
        assert!(hosts.is_empty());
    }

    #[rstest]
    fn history_lists_actions_in_order(fixture: Fixture) {
        for action in [Action::Create, Action::Stop, Action::Start] {
            record(&fixture, "none", "web", action);
        }
        let actions: Vec<Action> = fixture
            .inventory
            .history("none", "web")
            .unwrap_or_else(|err| panic!("history: {err}"))
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec![Action::Create, Action::Stop, Action::Start]);
    }
}
