//! The relay allow-list: accounts permitted to submit headers.

use crate::auth::CallContext;
use crate::error::HostError;
use keel_core::Name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayAction {
    Add,
    Remove,
}

impl fmt::Display for RelayAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayAction::Add => write!(f, "add"),
            RelayAction::Remove => write!(f, "remove"),
        }
    }
}

impl FromStr for RelayAction {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(RelayAction::Add),
            "remove" => Ok(RelayAction::Remove),
            other => Err(HostError::UnknownRelayAction(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySet {
    relays: BTreeSet<Name>,
}

impl RelaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, relay: Name) -> bool {
        self.relays.contains(&relay)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Name> + '_ {
        self.relays.iter()
    }

    pub fn apply(&mut self, action: RelayAction, relay: Name) -> Result<(), HostError> {
        match action {
            RelayAction::Add => {
                if !self.relays.insert(relay) {
                    return Err(HostError::RelayExists(relay.to_string()));
                }
            }
            RelayAction::Remove => {
                if !self.relays.remove(&relay) {
                    return Err(HostError::RelayNotFound(relay.to_string()));
                }
            }
        }
        info!(%relay, %action, "relay list updated");
        Ok(())
    }

    /// Fail unless the call is an authorized call from a listed relay.
    pub fn require_relay(&self, ctx: &CallContext) -> Result<(), HostError> {
        if !self.contains(ctx.caller) {
            return Err(HostError::NotRelay {
                caller: ctx.caller.to_string(),
            });
        }
        ctx.require_auth()
    }
}

impl FromIterator<Name> for RelaySet {
    fn from_iter<I: IntoIterator<Item = Name>>(iter: I) -> Self {
        Self {
            relays: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_and_remove() {
        let mut relays = RelaySet::new();
        relays.apply("add".parse().unwrap(), name("relay1")).unwrap();
        assert!(relays.contains(name("relay1")));
        assert_eq!(
            relays.apply(RelayAction::Add, name("relay1")),
            Err(HostError::RelayExists("relay1".into()))
        );

        relays.apply(RelayAction::Remove, name("relay1")).unwrap();
        assert!(!relays.contains(name("relay1")));
        assert_eq!(
            relays.apply(RelayAction::Remove, name("relay1")),
            Err(HostError::RelayNotFound("relay1".into()))
        );
    }

    #[test]
    fn test_unknown_action() {
        assert_eq!(
            "promote".parse::<RelayAction>(),
            Err(HostError::UnknownRelayAction("promote".into()))
        );
    }

    #[test]
    fn test_require_relay() {
        let relays: RelaySet = [name("relay1")].into_iter().collect();
        assert!(relays.require_relay(&CallContext::signed(name("relay1"))).is_ok());
        assert!(matches!(
            relays.require_relay(&CallContext::unsigned(name("relay1"))),
            Err(HostError::MissingAuthorization { .. })
        ));
        assert!(matches!(
            relays.require_relay(&CallContext::signed(name("relay2"))),
            Err(HostError::NotRelay { .. })
        ));
    }
}
