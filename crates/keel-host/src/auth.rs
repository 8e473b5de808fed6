//! Caller identity as the host environment reports it.

use crate::error::HostError;
use keel_core::Name;

/// Who is calling, and whether the host verified their authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Name,
    pub authorized: bool,
}

impl CallContext {
    /// A call the host verified `caller` signed.
    pub fn signed(caller: Name) -> Self {
        Self {
            caller,
            authorized: true,
        }
    }

    /// A call claiming to come from `caller` without a verified signature.
    pub fn unsigned(caller: Name) -> Self {
        Self {
            caller,
            authorized: false,
        }
    }

    pub fn require_auth(&self) -> Result<(), HostError> {
        if !self.authorized {
            return Err(HostError::MissingAuthorization {
                caller: self.caller.to_string(),
            });
        }
        Ok(())
    }

    /// Whether this is an authorized call from `account`.
    pub fn is(&self, account: Name) -> bool {
        self.authorized && self.caller == account
    }

    pub fn require_owner(&self, owner: Name) -> Result<(), HostError> {
        self.require_auth()?;
        if self.caller != owner {
            return Err(HostError::NotOwner {
                caller: self.caller.to_string(),
                owner: owner.to_string(),
            });
        }
        Ok(())
    }
}
