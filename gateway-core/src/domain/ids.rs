// SPDX-License-Identifier: AGPL-3.0
//! Newtype identifiers shared across the domain layer.
//!
//! Every aggregate gets its own UUID newtype rather than passing bare
//! `Uuid`s around, so a `PrincipalId` and a `ResourceId` can never be
//! swapped at a call site by accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(PrincipalId);
uuid_id!(SessionId);
uuid_id!(ApiKeyId);
uuid_id!(ResourceId);
uuid_id!(CapabilityId);
uuid_id!(AuditEventId);
uuid_id!(NodeId);
uuid_id!(CorrelationId);
uuid_id!(RequestId);
