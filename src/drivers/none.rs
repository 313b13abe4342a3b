//! Driver for hosts managed outside of machinist.
//!
//! Nothing is provisioned. The driver remembers the host's URL and tracks
//! the status implied by the last lifecycle action it was asked to perform.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::binder::Configuration;
use crate::driver::{Driver, DriverError, DriverFuture, OptionSpec, Status};

/// Provider name of the [`NoneDriver`].
pub const NONE_PROVIDER: &str = "none";

/// Persisted state of a [`NoneDriver`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NoneState {
    /// Host name.
    pub host: String,
    /// URL of the externally managed host; empty when unknown.
    pub url: String,
    /// Status implied by the last action.
    pub status: Status,
}

/// Driver for externally managed hosts.
#[derive(Clone, Debug, Default)]
pub struct NoneDriver {
    state: NoneState,
}

impl NoneDriver {
    /// Creates an uncreated driver for `host`.
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            state: NoneState {
                host: host.to_owned(),
                url: String::new(),
                status: Status::Missing,
            },
        }
    }

    /// Returns a registry factory for externally managed hosts.
    pub fn factory() -> impl Fn(&str, &Utf8Path) -> Box<dyn Driver> + Send + Sync + 'static {
        |host: &str, _store_root: &Utf8Path| -> Box<dyn Driver> { Box::new(Self::new(host)) }
    }

    /// Current in-memory state.
    #[must_use]
    pub const fn state(&self) -> &NoneState {
        &self.state
    }

    fn transition(&mut self, next: Status) -> DriverFuture<'_, ()> {
        self.state.status = next;
        Box::pin(async { Ok(()) })
    }
}

impl Driver for NoneDriver {
    fn provider(&self) -> &str {
        NONE_PROVIDER
    }

    fn declare_options(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::new(
            "url",
            "",
            "URL of the host, for example tcp://10.0.0.5:2376",
        )]
    }

    fn apply_config(&mut self, config: &Configuration) -> Result<(), DriverError> {
        let url = config.string("url")?.unwrap_or_default();
        if !url.is_empty() && !url.contains("://") {
            return Err(DriverError::InvalidConfig(format!(
                "url {url:?} must include a scheme, for example tcp://{url}"
            )));
        }
        url.clone_into(&mut self.state.url);
        Ok(())
    }

    fn create(&mut self) -> DriverFuture<'_, ()> {
        self.transition(Status::Running)
    }

    fn query(&self) -> DriverFuture<'_, Status> {
        let status = self.state.status;
        Box::pin(async move { Ok(status) })
    }

    fn start(&mut self) -> DriverFuture<'_, ()> {
        self.transition(Status::Running)
    }

    fn stop(&mut self) -> DriverFuture<'_, ()> {
        self.transition(Status::Stopped)
    }

    fn restart(&mut self) -> DriverFuture<'_, ()> {
        self.transition(Status::Running)
    }

    fn kill(&mut self) -> DriverFuture<'_, ()> {
        self.transition(Status::Stopped)
    }

    fn remove(&mut self) -> DriverFuture<'_, ()> {
        self.transition(Status::Missing)
    }

    fn serialize_state(&self) -> Result<Vec<u8>, DriverError> {
        serde_json::to_vec(&self.state).map_err(|err| DriverError::Encode(err.to_string()))
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<(), DriverError> {
        self.state =
            serde_json::from_slice(state).map_err(|err| DriverError::Decode(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{self, OptionValue, Overrides};
    use crate::driver::Action;
    use rstest::rstest;

    fn bound(url: &str) -> Result<NoneDriver, binder::InvalidConfig> {
        let mut driver = NoneDriver::new("h1");
        let overrides = Overrides::from([(String::from("url"), OptionValue::from(url))]);
        binder::bind(&mut driver, &overrides)?;
        Ok(driver)
    }

    #[rstest]
    #[case("")]
    #[case("tcp://10.0.0.5:2376")]
    fn accepts_empty_or_scheme_qualified_urls(#[case] url: &str) {
        let driver = bound(url).unwrap_or_else(|err| panic!("bind {url:?}: {err}"));
        assert_eq!(driver.state().url, url);
    }

    #[test]
    fn rejects_urls_without_a_scheme() {
        let err = bound("10.0.0.5").expect_err("bare address is rejected");
        assert!(err.0.contains("must include a scheme"), "{err}");
    }

    #[test]
    fn rejects_non_string_urls() {
        let mut driver = NoneDriver::new("h1");
        let overrides = Overrides::from([(String::from("url"), OptionValue::from(true))]);
        let err = binder::bind(&mut driver, &overrides).expect_err("bool url");
        assert_eq!(err.0, "option url must be a string, got a bool");
    }

    #[rstest]
    #[case(Action::Create, Status::Running)]
    #[case(Action::Start, Status::Running)]
    #[case(Action::Restart, Status::Running)]
    #[case(Action::Stop, Status::Stopped)]
    #[case(Action::Kill, Status::Stopped)]
    #[case(Action::Remove, Status::Missing)]
    #[tokio::test]
    async fn actions_set_the_implied_status(#[case] action: Action, #[case] expected: Status) {
        let mut driver = NoneDriver::new("h1");
        action
            .dispatch(&mut driver)
            .await
            .unwrap_or_else(|err| panic!("{action}: {err}"));
        let status = driver
            .query()
            .await
            .unwrap_or_else(|err| panic!("query: {err}"));
        assert_eq!(status, expected);
    }

    #[tokio::test]
    async fn uncreated_hosts_are_missing() {
        let driver = NoneDriver::new("h1");
        let status = driver
            .query()
            .await
            .unwrap_or_else(|err| panic!("query: {err}"));
        assert_eq!(status, Status::Missing);
    }

    #[test]
    fn state_survives_a_round_trip() {
        let mut original = bound("tcp://h1:2376").unwrap_or_else(|err| panic!("{err}"));
        original.state.status = Status::Stopped;
        let encoded = original
            .serialize_state()
            .unwrap_or_else(|err| panic!("serialize: {err}"));

        let mut restored = NoneDriver::new("");
        restored
            .restore_state(&encoded)
            .unwrap_or_else(|err| panic!("restore: {err}"));
        assert_eq!(restored.state(), original.state());
    }

    #[test]
    fn garbage_state_is_a_decode_error() {
        let mut driver = NoneDriver::new("h1");
        let err = driver.restore_state(b"{").expect_err("truncated json");
        assert!(matches!(err, DriverError::Decode(_)));
    }
}
